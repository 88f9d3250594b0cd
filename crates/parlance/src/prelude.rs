//! Convenience re-exports for common `parlance` types.
//!
//! ```ignore
//! use parlance::prelude::*;
//! ```
//!
//! Covers what a chat front end needs: [`Message`], the [`SessionManager`]
//! and its ledgers, the [`FunctionDispatcher`], the backend contract and
//! client, and configuration. Storage keys, dispatch phases and the vector
//! store internals stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{Message, Role, json_schema_for};

// ── Backend ─────────────────────────────────────────────────────────
pub use crate::api::{ChatModel, ModelFuture, OpenAiClient, RetryConfig, complete_with_retry};

// ── Memory ──────────────────────────────────────────────────────────
pub use crate::memory::{
    ContextWindow, EvictionHook, LedgerStore, SessionManager, SessionRegistry, SessionState,
    Transcript, WindowBudget,
};

// ── Functions ───────────────────────────────────────────────────────
pub use crate::functions::{
    FnFunction, Function, FunctionArgs, FunctionDef, FunctionDispatcher, FunctionFuture,
    FunctionResult, PromptTemplate,
};

// ── Recall ──────────────────────────────────────────────────────────
pub use crate::recall::{LocalVectorStore, ModelEmbedder, VectorStore};

// ── Orchestration and configuration ─────────────────────────────────
pub use crate::chat::{Conversation, Turn};
pub use crate::config::Config;
pub use crate::error::{BackendError, DispatchError, LedgerError, TurnError};
