//! Chat-completion backend contract and its HTTP implementation.
//!
//! - [`ChatModel`]: the capability the memory subsystem needs from a
//!   backend: one completion per message sequence, plus embeddings.
//! - [`client`]: [`OpenAiClient`](client::OpenAiClient), an
//!   OpenAI-compatible HTTP client (OpenAI, llama.cpp server, vLLM, ...).
//! - [`retry`]: exponential backoff for transient backend failures.

pub mod client;
pub mod retry;

use crate::Message;
use crate::error::BackendError;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;

pub use client::OpenAiClient;
pub use retry::{RetryConfig, complete_with_retry};

/// Boxed future returned by [`ChatModel`] methods.
///
/// Boxed so that `dyn ChatModel` stays object-safe.
pub type ModelFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// One embedding vector tagged with the position of its input text.
///
/// Backends are not required to return embeddings in input order; consumers
/// sort by `index`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct EmbeddingData {
    pub index: usize,
    pub embedding: Vec<f32>,
}

/// A chat-completion backend.
///
/// Implementations must return a complete message or an error; the session
/// never enqueues a partial response.
pub trait ChatModel: Send + Sync {
    /// Produce the next message for the given conversation.
    fn get_chat_completions<'a>(&'a self, messages: &'a [Message]) -> ModelFuture<'a, Message>;

    /// Embed each input text. The default implementation reports that the
    /// backend has no embedding support.
    fn get_embeddings<'a>(&'a self, input: &'a [String]) -> ModelFuture<'a, Vec<EmbeddingData>> {
        let _ = input;
        Box::pin(async { Err(BackendError::Unsupported("embeddings".into())) })
    }
}
