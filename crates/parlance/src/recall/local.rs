//! File-backed vector store.
//!
//! Keeps a whole collection in memory and rewrites `<dir>/<collection>.json`
//! after every upsert (temp file + rename). Queries are a linear scan by
//! cosine distance, which is fine for the few thousand messages a single
//! conversation archives.

use super::{Embedder, Metadata, QueryMatch, QueryResult, RecallFuture, VectorStore};
use crate::error::RecallError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    id: String,
    document: String,
    metadata: Metadata,
    embedding: Vec<f32>,
}

pub struct LocalVectorStore {
    collection: String,
    path: Option<PathBuf>,
    embedder: Arc<dyn Embedder>,
    entries: Mutex<Vec<Entry>>,
}

impl LocalVectorStore {
    /// Open (or create) `collection` under `dir`.
    pub fn open(
        collection: impl Into<String>,
        dir: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, RecallError> {
        let collection = collection.into();
        let path = dir.into().join(format!("{collection}.json"));
        let entries = if path.exists() {
            let json = std::fs::read_to_string(&path)
                .map_err(|e| RecallError::Persistence(format!("failed to read {}: {e}", path.display())))?;
            serde_json::from_str(&json)
                .map_err(|e| RecallError::Persistence(format!("failed to parse {}: {e}", path.display())))?
        } else {
            Vec::new()
        };
        debug!("Opened collection {collection} ({} entries)", entries.len());
        Ok(Self {
            collection,
            path: Some(path),
            embedder,
            entries: Mutex::new(entries),
        })
    }

    /// A collection that is never written to disk.
    pub fn in_memory(collection: impl Into<String>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            collection: collection.into(),
            path: None,
            embedder,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn write(&self, entries: &[Entry]) -> Result<(), RecallError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RecallError::Persistence(format!("failed to create dir: {e}")))?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string(entries)
            .map_err(|e| RecallError::Persistence(format!("failed to serialize: {e}")))?;
        std::fs::write(&tmp, json)
            .map_err(|e| RecallError::Persistence(format!("failed to write: {e}")))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| RecallError::Persistence(format!("failed to rename: {e}")))?;
        Ok(())
    }
}

/// `1 - cosine similarity`; zero vectors are maximally distant.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na.sqrt() * nb.sqrt())
}

fn matches_filter(metadata: &Metadata, filter: Option<&Metadata>) -> bool {
    filter.is_none_or(|f| f.iter().all(|(k, v)| metadata.get(k) == Some(v)))
}

impl VectorStore for LocalVectorStore {
    fn collection_name(&self) -> &str {
        &self.collection
    }

    fn upsert<'a>(
        &'a self,
        ids: &'a [String],
        metadatas: &'a [Metadata],
        documents: &'a [String],
    ) -> RecallFuture<'a, ()> {
        Box::pin(async move {
            if ids.len() != metadatas.len() || ids.len() != documents.len() {
                return Err(RecallError::LengthMismatch {
                    ids: ids.len(),
                    metadatas: metadatas.len(),
                    documents: documents.len(),
                });
            }
            let embeddings = self.embedder.embed(documents).await?;
            if embeddings.len() != documents.len() {
                return Err(RecallError::EmbeddingCount {
                    expected: documents.len(),
                    actual: embeddings.len(),
                });
            }

            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            for (((id, metadata), document), embedding) in
                ids.iter().zip(metadatas).zip(documents).zip(embeddings)
            {
                let entry = Entry {
                    id: id.clone(),
                    document: document.clone(),
                    metadata: metadata.clone(),
                    embedding,
                };
                match entries.iter_mut().find(|e| e.id == *id) {
                    Some(existing) => *existing = entry,
                    None => entries.push(entry),
                }
            }
            self.write(&entries)?;
            debug!("Upserted {} document(s) into {}", ids.len(), self.collection);
            Ok(())
        })
    }

    fn query<'a>(
        &'a self,
        query_texts: &'a [String],
        n_results: usize,
        filter: Option<&'a Metadata>,
    ) -> RecallFuture<'a, QueryResult> {
        Box::pin(async move {
            if query_texts.is_empty() {
                return Ok(QueryResult::default());
            }
            let queries = self.embedder.embed(query_texts).await?;

            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let matches = queries
                .iter()
                .map(|query| {
                    let mut scored: Vec<QueryMatch> = entries
                        .iter()
                        .filter(|e| matches_filter(&e.metadata, filter))
                        .map(|e| QueryMatch {
                            id: e.id.clone(),
                            document: e.document.clone(),
                            metadata: e.metadata.clone(),
                            distance: cosine_distance(query, &e.embedding),
                        })
                        .collect();
                    scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
                    scored.truncate(n_results);
                    scored
                })
                .collect();
            Ok(QueryResult { matches })
        })
    }

    fn count(&self) -> RecallFuture<'_, usize> {
        let n = self.entries.lock().unwrap_or_else(|e| e.into_inner()).len();
        Box::pin(async move { Ok(n) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Embeds a text as its counts of the letters a, b and c.
    struct LetterCounts;

    impl Embedder for LetterCounts {
        fn embed<'a>(&'a self, texts: &'a [String]) -> RecallFuture<'a, Vec<Vec<f32>>> {
            let vectors = texts
                .iter()
                .map(|t| {
                    ['a', 'b', 'c']
                        .iter()
                        .map(|l| t.chars().filter(|c| c == l).count() as f32)
                        .collect()
                })
                .collect();
            Box::pin(async move { Ok(vectors) })
        }
    }

    fn meta(role: &str) -> Metadata {
        Metadata::from([("role".to_string(), role.to_string())])
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn query_orders_by_similarity() {
        let store = LocalVectorStore::in_memory("c", Arc::new(LetterCounts));
        store
            .upsert(
                &strings(&["1", "2", "3"]),
                &[meta("user"), meta("user"), meta("assistant")],
                &strings(&["aaaa", "bbbb", "cccc"]),
            )
            .await
            .unwrap();

        let result = store.query(&strings(&["bba"]), 2, None).await.unwrap();
        let ids: Vec<_> = result.into_flat().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["2", "1"]);
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = LocalVectorStore::in_memory("c", Arc::new(LetterCounts));
        let ids = strings(&["x"]);
        store.upsert(&ids, &[meta("user")], &strings(&["aaa"])).await.unwrap();
        store.upsert(&ids, &[meta("user")], &strings(&["ccc"])).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let result = store.query(&strings(&["c"]), 5, None).await.unwrap();
        assert_eq!(result.into_flat()[0].document, "ccc");
    }

    #[tokio::test]
    async fn filter_restricts_matches() {
        let store = LocalVectorStore::in_memory("c", Arc::new(LetterCounts));
        store
            .upsert(
                &strings(&["1", "2"]),
                &[meta("user"), meta("assistant")],
                &strings(&["ab", "ab"]),
            )
            .await
            .unwrap();

        let filter = meta("assistant");
        let result = store.query(&strings(&["ab"]), 10, Some(&filter)).await.unwrap();
        let flat = result.into_flat();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].id, "2");
    }

    #[tokio::test]
    async fn mismatched_lengths_rejected() {
        let store = LocalVectorStore::in_memory("c", Arc::new(LetterCounts));
        let err = store
            .upsert(&strings(&["1", "2"]), &[meta("user")], &strings(&["a", "b"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RecallError::LengthMismatch { .. }));
    }

    #[tokio::test]
    async fn persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalVectorStore::open("mem", dir.path(), Arc::new(LetterCounts)).unwrap();
            store
                .upsert(&strings(&["1"]), &[meta("user")], &strings(&["abc"]))
                .await
                .unwrap();
        }
        assert!(dir.path().join("mem.json").exists());

        let reopened = LocalVectorStore::open("mem", dir.path(), Arc::new(LetterCounts)).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        assert_eq!(reopened.collection_name(), "mem");
    }

    #[test]
    fn cosine_distance_bounds() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }
}
