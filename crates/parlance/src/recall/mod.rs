//! Overflow recall: messages evicted from the context window are archived in
//! a vector store and can be searched later by similarity.
//!
//! The session only ever upserts and queries, so the store is a trait.
//! [`LocalVectorStore`] is a small file-backed implementation that is good
//! enough for a single user; anything else can be plugged in behind
//! [`VectorStore`].

pub mod archiver;
pub mod embedding;
pub mod local;

pub use archiver::RecallArchiver;
pub use embedding::ModelEmbedder;
pub use local::LocalVectorStore;

use crate::error::RecallError;
use crate::{Message, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`VectorStore`] and [`Embedder`] methods.
pub type RecallFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RecallError>> + Send + 'a>>;

/// Flat string metadata stored alongside each document.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key holding the role of an archived message.
pub const ROLE_KEY: &str = "role";

/// Metadata key holding the session an archived message was evicted from.
pub const SESSION_KEY: &str = "session";

/// Metadata recorded for a message archived from `session`.
pub fn metadata_for(message: &Message, session: &str) -> Metadata {
    let mut metadata = session_filter(session);
    metadata.insert(ROLE_KEY.to_string(), message.role.as_str().to_string());
    metadata
}

/// Query filter restricting matches to messages archived from `session`.
pub fn session_filter(session: &str) -> Metadata {
    Metadata::from([(SESSION_KEY.to_string(), session.to_string())])
}

/// Turns texts into embedding vectors.
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order.
    fn embed<'a>(&'a self, texts: &'a [String]) -> RecallFuture<'a, Vec<Vec<f32>>>;
}

/// One document returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    /// Smaller is closer.
    pub distance: f32,
}

impl QueryMatch {
    /// Rebuild the archived message. Entries without a recognizable role
    /// come back as `user` messages.
    pub fn to_message(&self) -> Message {
        let role = self
            .metadata
            .get(ROLE_KEY)
            .and_then(|r| r.parse::<Role>().ok())
            .unwrap_or(Role::User);
        Message {
            role,
            content: Some(self.document.clone()),
            function_call_name: None,
            function_call_arguments: None,
        }
    }
}

/// Results of a query: one list of matches per query text, closest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub matches: Vec<Vec<QueryMatch>>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.matches.iter().all(Vec::is_empty)
    }

    /// All matches across query texts, in query order.
    pub fn into_flat(self) -> Vec<QueryMatch> {
        self.matches.into_iter().flatten().collect()
    }
}

/// A named collection of embedded documents.
pub trait VectorStore: Send + Sync {
    fn collection_name(&self) -> &str;

    /// Insert new documents and replace existing ones with the same id.
    /// `ids`, `metadatas` and `documents` must have equal length.
    fn upsert<'a>(
        &'a self,
        ids: &'a [String],
        metadatas: &'a [Metadata],
        documents: &'a [String],
    ) -> RecallFuture<'a, ()>;

    /// Up to `n_results` closest documents per query text, restricted to
    /// documents whose metadata contains every pair in `filter`.
    fn query<'a>(
        &'a self,
        query_texts: &'a [String],
        n_results: usize,
        filter: Option<&'a Metadata>,
    ) -> RecallFuture<'a, QueryResult>;

    /// Number of documents in the collection.
    fn count(&self) -> RecallFuture<'_, usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_rebuilds_message_with_role() {
        let m = QueryMatch {
            id: "c_1".into(),
            document: "old reply".into(),
            metadata: metadata_for(&Message::assistant("x"), "s"),
            distance: 0.1,
        };
        let message = m.to_message();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content.as_deref(), Some("old reply"));
    }

    #[test]
    fn unknown_role_falls_back_to_user() {
        let m = QueryMatch {
            id: "c_1".into(),
            document: "doc".into(),
            metadata: Metadata::new(),
            distance: 0.0,
        };
        assert_eq!(m.to_message().role, Role::User);
    }

    #[test]
    fn empty_result() {
        let result = QueryResult {
            matches: vec![vec![], vec![]],
        };
        assert!(result.is_empty());
        assert!(result.into_flat().is_empty());
    }
}
