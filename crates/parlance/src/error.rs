//! Error types for every layer of the runtime.
//!
//! Ledger and dispatcher errors are normally logged and converted into
//! `bool`/`Option` outcomes at their own boundary; they are still typed so
//! callers that want the reason can match on it.

use crate::Role;
use std::path::PathBuf;

/// Failures of the chat-completion backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("empty response (no choices)")]
    EmptyResponse,

    #[error("{0} is not supported by this backend")]
    Unsupported(String),
}

impl BackendError {
    /// Whether retrying the same request may succeed: rate limits, server
    /// errors, and network failures. Client errors are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Http { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            BackendError::Request(_) => true,
            _ => false,
        }
    }
}

/// Failures of the context window and transcript ledgers.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger holds no evictable message")]
    EmptyLedger,

    #[error("a ledger must start with a system message, got {0}")]
    MissingSystemMessage(Role),

    #[error("ledger already has a system message")]
    DuplicateSystemMessage,

    #[error("the system slot requires role system, got {0}")]
    NotSystemRole(Role),

    #[error("invalid session name '{0}'")]
    InvalidSessionName(String),

    #[error("session '{0}' is closed")]
    SessionClosed(String),

    #[error("persistence failure for {key}: {reason}")]
    PersistenceFailure { key: String, reason: String },
}

/// Failures while resolving, executing, or following up a function call.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("function {0} not found")]
    FunctionNotFound(String),

    #[error("invalid arguments for {name}: {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("error executing function {name}: {reason}")]
    FunctionExecutionError { name: String, reason: String },

    #[error("no prompt template registered for {0}")]
    TemplateNotFound(String),

    #[error("backend failure: {0}")]
    BackendFailure(#[from] BackendError),
}

/// Failures of the overflow-recall vector store.
#[derive(Debug, thiserror::Error)]
pub enum RecallError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] BackendError),

    #[error("expected {expected} embeddings, got {actual}")]
    EmbeddingCount { expected: usize, actual: usize },

    #[error("ids, metadatas and documents differ in length ({ids}/{metadatas}/{documents})")]
    LengthMismatch {
        ids: usize,
        metadatas: usize,
        documents: usize,
    },

    #[error("vector store persistence failure: {0}")]
    Persistence(String),
}

/// Failures loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("config validation error: {0}")]
    Validation(String),
}

/// Failures of a single chat turn.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
