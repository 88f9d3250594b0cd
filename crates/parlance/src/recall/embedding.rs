//! Embeddings produced by the chat backend.

use super::{Embedder, RecallFuture};
use crate::api::ChatModel;
use crate::error::RecallError;
use std::sync::Arc;
use tracing::debug;

/// [`Embedder`] that delegates to [`ChatModel::get_embeddings`].
///
/// Newlines are replaced with spaces before embedding, and results are put
/// back in input order using the index the backend reports.
pub struct ModelEmbedder {
    model: Arc<dyn ChatModel>,
}

impl ModelEmbedder {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

impl Embedder for ModelEmbedder {
    fn embed<'a>(&'a self, texts: &'a [String]) -> RecallFuture<'a, Vec<Vec<f32>>> {
        Box::pin(async move {
            let input: Vec<String> = texts.iter().map(|t| t.replace('\n', " ")).collect();
            let mut data = self.model.get_embeddings(&input).await?;
            if data.len() != texts.len() {
                return Err(RecallError::EmbeddingCount {
                    expected: texts.len(),
                    actual: data.len(),
                });
            }
            data.sort_by_key(|d| d.index);
            debug!("Embedded {} text(s)", data.len());
            Ok(data.into_iter().map(|d| d.embedding).collect())
        })
    }
}
