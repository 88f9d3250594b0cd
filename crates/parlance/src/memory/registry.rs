//! Per-session locking for hosts that serve several conversations.
//!
//! Each session lives behind its own `tokio::sync::Mutex`, so turns within a
//! session are serialized while different sessions proceed independently.
//! Sessions never share ledgers.

use super::budget::WindowBudget;
use super::session::SessionManager;
use super::store::LedgerStore;
use crate::Message;
use crate::api::ChatModel;
use crate::error::LedgerError;
use crate::recall::VectorStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A session shared between tasks.
pub type SharedSession = Arc<tokio::sync::Mutex<SessionManager>>;

pub struct SessionRegistry {
    store: LedgerStore,
    budget: WindowBudget,
    model: Arc<dyn ChatModel>,
    recall: Option<Arc<dyn VectorStore>>,
    system_prompt: Message,
    sessions: Mutex<HashMap<String, SharedSession>>,
}

impl SessionRegistry {
    pub fn new(
        store: LedgerStore,
        budget: WindowBudget,
        model: Arc<dyn ChatModel>,
        system_prompt: Message,
    ) -> Self {
        Self {
            store,
            budget,
            model,
            recall: None,
            system_prompt,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Attach the same vector store to every session this registry opens.
    pub fn with_recall(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.recall = Some(store);
        self
    }

    /// The session named `name`, loading or seeding it on first use.
    pub async fn open(&self, name: &str) -> Result<SharedSession, LedgerError> {
        if let Some(existing) = self.get(name) {
            return Ok(existing);
        }

        let mut session = SessionManager::new(name, self.store.clone(), self.budget.clone(), self.model.clone())?;
        if let Some(recall) = &self.recall {
            session = session.with_recall(recall.clone());
        }
        session.load(self.system_prompt.clone()).await?;

        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        // Another task may have opened the same session while this one loaded.
        let shared = sessions
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(session)))
            .clone();
        debug!("Session '{name}' registered ({} open)", sessions.len());
        Ok(shared)
    }

    pub fn get(&self, name: &str) -> Option<SharedSession> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Drop a session from the registry. Its ledgers stay on disk.
    pub fn remove(&self, name: &str) -> Option<SharedSession> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
    }

    /// Names of the open sessions, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Save every open session. True only if all saves succeed.
    pub async fn save_all(&self) -> bool {
        let sessions: Vec<SharedSession> = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let mut all_saved = true;
        for session in sessions {
            all_saved &= session.lock().await.save();
        }
        all_saved
    }
}
