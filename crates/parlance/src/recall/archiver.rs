//! Archive evicted context-window messages into a vector store.

use super::{VectorStore, metadata_for};
use crate::Message;
use crate::memory::window::{EvictionHook, HookFuture};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// [`EvictionHook`] that upserts each evicted message into a [`VectorStore`].
///
/// Ids are `<collection>_<session>_<utc timestamp>_<seq>`; the sequence
/// number keeps ids unique when several messages are evicted within one
/// clock tick. Entries carry the session name in their metadata so one store
/// can serve many sessions. A failing store is logged and otherwise ignored,
/// leaving plain FIFO eviction.
pub struct RecallArchiver {
    store: Arc<dyn VectorStore>,
    session: String,
    seq: AtomicU64,
}

impl RecallArchiver {
    pub fn new(store: Arc<dyn VectorStore>, session: impl Into<String>) -> Self {
        Self {
            store,
            session: session.into(),
            seq: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f");
        format!("{}_{}_{stamp}_{seq}", self.store.collection_name(), self.session)
    }
}

impl EvictionHook for RecallArchiver {
    fn on_evict<'a>(&'a self, message: &'a Message) -> HookFuture<'a> {
        Box::pin(async move {
            // Bare function-call requests have nothing to search on.
            let Some(content) = message.content.as_deref().filter(|c| !c.is_empty()) else {
                debug!("Skipping archival of {} message without content", message.role);
                return;
            };
            let ids = [self.next_id()];
            let metadatas = [metadata_for(message, &self.session)];
            let documents = [content.to_string()];
            match self.store.upsert(&ids, &metadatas, &documents).await {
                Ok(()) => debug!("Archived evicted message as {}", ids[0]),
                Err(e) => warn!("Failed to archive evicted message: {e}"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecallError;
    use crate::recall::{Metadata, QueryResult, RecallFuture};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Captured {
        rows: Mutex<Vec<(String, Metadata, String)>>,
        fail: bool,
    }

    impl VectorStore for Captured {
        fn collection_name(&self) -> &str {
            "chat"
        }

        fn upsert<'a>(
            &'a self,
            ids: &'a [String],
            metadatas: &'a [Metadata],
            documents: &'a [String],
        ) -> RecallFuture<'a, ()> {
            Box::pin(async move {
                if self.fail {
                    return Err(RecallError::Persistence("down".into()));
                }
                let mut rows = self.rows.lock().unwrap();
                for ((id, m), d) in ids.iter().zip(metadatas).zip(documents) {
                    rows.push((id.clone(), m.clone(), d.clone()));
                }
                Ok(())
            })
        }

        fn query<'a>(
            &'a self,
            _query_texts: &'a [String],
            _n_results: usize,
            _filter: Option<&'a Metadata>,
        ) -> RecallFuture<'a, QueryResult> {
            Box::pin(async { Ok(QueryResult::default()) })
        }

        fn count(&self) -> RecallFuture<'_, usize> {
            let n = self.rows.lock().unwrap().len();
            Box::pin(async move { Ok(n) })
        }
    }

    #[tokio::test]
    async fn archives_with_role_metadata_and_unique_ids() {
        let store = Arc::new(Captured::default());
        let archiver = RecallArchiver::new(store.clone(), "s1");
        archiver.on_evict(&Message::user("first")).await;
        archiver.on_evict(&Message::assistant("second")).await;

        let rows = store.rows.lock().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].0.starts_with("chat_s1_"));
        assert_ne!(rows[0].0, rows[1].0);
        assert_eq!(rows[1].1["role"], "assistant");
        assert_eq!(rows[1].1["session"], "s1");
        assert_eq!(rows[1].2, "second");
    }

    #[tokio::test]
    async fn skips_messages_without_content() {
        let store = Arc::new(Captured::default());
        let archiver = RecallArchiver::new(store.clone(), "s1");
        archiver.on_evict(&Message::function_call("f", "{}")).await;
        assert!(store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        let store = Arc::new(Captured {
            fail: true,
            ..Default::default()
        });
        let archiver = RecallArchiver::new(store, "s1");
        archiver.on_evict(&Message::user("lost")).await;
    }
}
