//! Session manager: one conversation, two ledgers.
//!
//! Every write goes to the [`ContextWindow`] first and then to the
//! [`Transcript`], so the transcript always holds everything the window has
//! ever held, in the same order. Both ledgers are loaded and saved together.
//! A session resumes only if both ledgers have prior state; otherwise both are
//! reset and seeded with the system prompt.
//!
//! ```text
//! Uninitialized ──load──▶ Loading ──▶ Active ◀──write──▶ Saved
//!                                        │                 │
//!                                        └─────close───────┴──▶ Closed
//! ```

use super::budget::WindowBudget;
use super::check_admissible;
use super::store::{LedgerKind, LedgerStore, is_valid_session_name};
use super::transcript::Transcript;
use super::window::{ContextWindow, EvictionHook};
use crate::api::ChatModel;
use crate::error::LedgerError;
use crate::recall::{RecallArchiver, VectorStore, session_filter};
use crate::{Message, Role};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Roles returned by [`SessionManager::output`] by default.
pub const OUTPUT_ROLES: [Role; 4] = Role::ALL;

/// Roles shown by [`SessionManager::print`] by default.
pub const PRINT_ROLES: [Role; 3] = [Role::System, Role::User, Role::Assistant];

/// Lifecycle of a [`SessionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Loading,
    Active,
    Saved,
    Closed,
}

pub struct SessionManager {
    name: String,
    store: LedgerStore,
    state: SessionState,
    window: ContextWindow,
    transcript: Transcript,
    model: Arc<dyn ChatModel>,
    recall: Option<Arc<dyn VectorStore>>,
}

impl SessionManager {
    /// Create a session. Nothing is read from storage until [`load`](Self::load).
    pub fn new(
        name: impl Into<String>,
        store: LedgerStore,
        budget: WindowBudget,
        model: Arc<dyn ChatModel>,
    ) -> Result<Self, LedgerError> {
        let name = name.into();
        if !is_valid_session_name(&name) {
            return Err(LedgerError::InvalidSessionName(name));
        }
        Ok(Self {
            window: ContextWindow::new(name.clone(), store.clone(), budget),
            transcript: Transcript::new(name.clone(), store.clone()),
            name,
            store,
            state: SessionState::Uninitialized,
            model,
            recall: None,
        })
    }

    /// Archive evicted messages into `store` and enable [`recall`](Self::recall).
    pub fn with_recall(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.window
            .set_eviction_hook(Arc::new(RecallArchiver::new(store.clone(), self.name.clone())));
        self.recall = Some(store);
        self
    }

    /// Hand evicted messages to a custom hook instead of a vector store.
    pub fn with_eviction_hook(mut self, hook: Arc<dyn EvictionHook>) -> Self {
        self.window.set_eviction_hook(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn model(&self) -> &Arc<dyn ChatModel> {
        &self.model
    }

    pub fn window(&self) -> &ContextWindow {
        &self.window
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    fn ensure_open(&self) -> Result<(), LedgerError> {
        if self.state == SessionState::Closed {
            return Err(LedgerError::SessionClosed(self.name.clone()));
        }
        Ok(())
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Resume the session from storage, or start it fresh.
    ///
    /// Returns `Ok(true)` when both ledgers were restored and `Ok(false)` when
    /// the session was seeded with `system_prompt`. If only one ledger had
    /// prior state it is set aside under a `.stale` name before seeding.
    pub async fn load(&mut self, system_prompt: Message) -> Result<bool, LedgerError> {
        self.ensure_open()?;
        if !system_prompt.is_system() {
            return Err(LedgerError::NotSystemRole(system_prompt.role));
        }
        self.state = SessionState::Loading;

        match self.resume_or_seed(system_prompt).await {
            Ok(resumed) => Ok(resumed),
            Err(e) => {
                // Never leave a half-loaded session behind.
                self.window.clear();
                self.transcript.clear();
                self.state = SessionState::Uninitialized;
                Err(e)
            }
        }
    }

    async fn resume_or_seed(&mut self, system_prompt: Message) -> Result<bool, LedgerError> {
        let (window_loaded, transcript_loaded) = self.load_ledgers()?;

        if window_loaded && transcript_loaded {
            info!(
                "Resumed session '{}' ({} in window, {} in transcript)",
                self.name,
                self.window.len(),
                self.transcript.len()
            );
            self.state = SessionState::Active;
            return Ok(true);
        }

        if window_loaded || transcript_loaded {
            warn!(
                "Session '{}' has only one ledger on disk; starting over",
                self.name
            );
            let orphan = if window_loaded {
                self.window.key().clone()
            } else {
                self.transcript.key().clone()
            };
            self.store.set_aside(&orphan)?;
        }

        self.seed(system_prompt).await?;
        info!("Started session '{}'", self.name);
        Ok(false)
    }

    fn load_ledgers(&mut self) -> Result<(bool, bool), LedgerError> {
        let window_loaded = self.window.load_to_chat_completions()?;
        let transcript_loaded = self.transcript.load_to_chat_completions()?;
        Ok((window_loaded, transcript_loaded))
    }

    async fn seed(&mut self, system_prompt: Message) -> Result<(), LedgerError> {
        self.window.clear();
        self.transcript.clear();
        self.window.set_system_message(system_prompt.clone()).await?;
        self.transcript.set_system_message(system_prompt)?;
        self.state = SessionState::Active;
        Ok(())
    }

    /// Persist both ledgers. True only if both writes succeed; a failed write
    /// does not undo the other.
    pub fn save(&mut self) -> bool {
        if self.state == SessionState::Closed {
            warn!("Not saving closed session '{}'", self.name);
            return false;
        }
        let window_saved = self.window.save_from_chat_completions();
        let transcript_saved = self.transcript.save_from_chat_completions();
        let saved = window_saved && transcript_saved;
        if saved {
            debug!("Saved session '{}'", self.name);
            self.state = SessionState::Saved;
        } else {
            warn!(
                "Session '{}' saved partially ({}: {window_saved}, {}: {transcript_saved})",
                self.name,
                LedgerKind::Context,
                LedgerKind::Transcript
            );
        }
        saved
    }

    pub fn close(&mut self) {
        info!("Closed session '{}'", self.name);
        self.state = SessionState::Closed;
    }

    // ── Ledger writes ──────────────────────────────────────────────

    /// Append `message` to the window, then to the transcript.
    ///
    /// Returns the messages evicted from the window.
    pub async fn enqueue(&mut self, message: Message) -> Result<Vec<Message>, LedgerError> {
        self.ensure_open()?;
        check_admissible(self.window.head(), &message)?;
        check_admissible(self.transcript.head(), &message)?;

        let evicted = self.window.enqueue(message.clone()).await?;
        self.transcript.enqueue(message)?;
        self.state = SessionState::Active;
        Ok(evicted)
    }

    /// Remove the oldest non-system message from the window. The transcript
    /// keeps it.
    pub fn dequeue(&mut self) -> Result<Message, LedgerError> {
        self.ensure_open()?;
        let message = self.window.dequeue()?;
        self.state = SessionState::Active;
        Ok(message)
    }

    pub fn system_message(&self) -> Option<&Message> {
        self.window.system_message()
    }

    /// Replace the system message in both ledgers.
    pub async fn set_system_message(&mut self, message: Message) -> Result<(), LedgerError> {
        self.ensure_open()?;
        if !message.is_system() {
            return Err(LedgerError::NotSystemRole(message.role));
        }
        self.window.set_system_message(message.clone()).await?;
        self.transcript.set_system_message(message)?;
        self.state = SessionState::Active;
        Ok(())
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Window messages whose role is in `roles` (all roles by default).
    pub fn output(&self, roles: Option<&[Role]>) -> Vec<Message> {
        let roles = roles.unwrap_or(&OUTPUT_ROLES);
        self.window
            .iter()
            .filter(|m| roles.contains(&m.role))
            .cloned()
            .collect()
    }

    /// Write window messages as role/content blocks to stdout. Function
    /// results are hidden by default.
    pub fn print(&self, roles: Option<&[Role]>) -> io::Result<()> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        self.write_to(&mut out, roles)
    }

    pub fn write_to<W: Write>(&self, out: &mut W, roles: Option<&[Role]>) -> io::Result<()> {
        for message in self.output(Some(roles.unwrap_or(&PRINT_ROLES))) {
            writeln!(out, "{}", message.role)?;
            match (&message.content, &message.function_call_name) {
                (Some(content), _) => writeln!(out, "{content}")?,
                (None, Some(name)) => writeln!(out, "[function call: {name}]")?,
                (None, None) => writeln!(out)?,
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Archived messages from this session most similar to `query`.
    ///
    /// Empty when no vector store is attached or the store fails.
    pub async fn recall(&self, query: &str, n_results: usize) -> Vec<Message> {
        let Some(store) = &self.recall else {
            debug!("Recall requested but no vector store is attached");
            return Vec::new();
        };
        let query_texts = [query.to_string()];
        let filter = session_filter(&self.name);
        match store.query(&query_texts, n_results, Some(&filter)).await {
            Ok(result) => result.into_flat().iter().map(|m| m.to_message()).collect(),
            Err(e) => {
                warn!("Recall query failed: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{EmbeddingData, ModelFuture};
    use crate::memory::store::LedgerKey;
    use crate::recall::{LocalVectorStore, ModelEmbedder};

    struct Echo;

    impl ChatModel for Echo {
        fn get_chat_completions<'a>(&'a self, _messages: &'a [Message]) -> ModelFuture<'a, Message> {
            Box::pin(async { Ok(Message::assistant("echo")) })
        }

        fn get_embeddings<'a>(&'a self, input: &'a [String]) -> ModelFuture<'a, Vec<EmbeddingData>> {
            let data = input
                .iter()
                .enumerate()
                .map(|(index, text)| EmbeddingData {
                    index,
                    embedding: vec![text.len() as f32, 1.0],
                })
                .collect();
            Box::pin(async move { Ok(data) })
        }
    }

    fn session(dir: &std::path::Path, budget: WindowBudget) -> SessionManager {
        SessionManager::new("s", LedgerStore::new(dir), budget, Arc::new(Echo)).unwrap()
    }

    fn contents<'a>(messages: impl IntoIterator<Item = &'a Message>) -> Vec<String> {
        messages
            .into_iter()
            .map(|m| m.content.clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn rejects_unsafe_session_name() {
        let err = SessionManager::new(
            "../x",
            LedgerStore::new("/tmp"),
            WindowBudget::unbounded(),
            Arc::new(Echo),
        )
        .err()
        .unwrap();
        assert!(matches!(err, LedgerError::InvalidSessionName(_)));
    }

    #[tokio::test]
    async fn fresh_load_seeds_both_ledgers() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), WindowBudget::unbounded());
        assert_eq!(s.state(), SessionState::Uninitialized);

        assert!(!s.load(Message::system("S")).await.unwrap());
        assert_eq!(s.state(), SessionState::Active);
        assert_eq!(contents(s.window()), ["S"]);
        assert_eq!(contents(s.transcript()), ["S"]);
    }

    #[tokio::test]
    async fn load_requires_system_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), WindowBudget::unbounded());
        assert!(matches!(
            s.load(Message::user("u")).await,
            Err(LedgerError::NotSystemRole(Role::User))
        ));
    }

    #[tokio::test]
    async fn enqueue_fans_out_window_then_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), WindowBudget::messages(3));
        s.load(Message::system("S")).await.unwrap();
        for text in ["u1", "a1", "u2"] {
            s.enqueue(Message::user(text)).await.unwrap();
        }
        assert_eq!(contents(s.window()), ["S", "a1", "u2"]);
        assert_eq!(contents(s.transcript()), ["S", "u1", "a1", "u2"]);
    }

    #[tokio::test]
    async fn rejected_enqueue_touches_neither_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), WindowBudget::unbounded());
        s.load(Message::system("S")).await.unwrap();
        assert!(s.enqueue(Message::system("S2")).await.is_err());
        assert_eq!(s.window().len(), 1);
        assert_eq!(s.transcript().len(), 1);
    }

    #[tokio::test]
    async fn dequeue_only_shrinks_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), WindowBudget::unbounded());
        s.load(Message::system("S")).await.unwrap();
        s.enqueue(Message::user("u")).await.unwrap();

        assert_eq!(s.dequeue().unwrap(), Message::user("u"));
        assert_eq!(s.window().len(), 1);
        assert_eq!(s.transcript().len(), 2);
        assert!(matches!(s.dequeue(), Err(LedgerError::EmptyLedger)));
    }

    #[tokio::test]
    async fn set_system_message_updates_both() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), WindowBudget::unbounded());
        s.load(Message::system("old")).await.unwrap();
        s.set_system_message(Message::system("new")).await.unwrap();
        assert_eq!(s.window().system_message(), Some(&Message::system("new")));
        assert_eq!(s.transcript().system_message(), Some(&Message::system("new")));
    }

    #[tokio::test]
    async fn save_then_resume() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut s = session(dir.path(), WindowBudget::unbounded());
            s.load(Message::system("S")).await.unwrap();
            s.enqueue(Message::user("remember me")).await.unwrap();
            assert!(s.save());
            assert_eq!(s.state(), SessionState::Saved);
        }
        let mut s = session(dir.path(), WindowBudget::unbounded());
        assert!(s.load(Message::system("ignored")).await.unwrap());
        assert_eq!(contents(s.window()), ["S", "remember me"]);
    }

    #[tokio::test]
    async fn partial_state_is_set_aside_and_reseeded() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path());
        let key = LedgerKey::new("s", LedgerKind::Transcript);
        store
            .write(&key, &[Message::system("S"), Message::user("old")])
            .unwrap();

        let mut s = session(dir.path(), WindowBudget::unbounded());
        assert!(!s.load(Message::system("fresh")).await.unwrap());
        assert_eq!(contents(s.window()), ["fresh"]);
        assert_eq!(contents(s.transcript()), ["fresh"]);
        assert!(!store.exists(&key));

        let stale = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().contains(".stale-"))
            .count();
        assert_eq!(stale, 1);
    }

    #[tokio::test]
    async fn malformed_ledger_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("s_context.json"), "not json").unwrap();
        let mut s = session(dir.path(), WindowBudget::unbounded());
        assert!(s.load(Message::system("S")).await.is_err());
        assert_eq!(s.state(), SessionState::Uninitialized);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_set_aside_leaves_session_uninitialized() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path());
        let key = LedgerKey::new("s", LedgerKind::Context);
        store
            .write(&key, &[Message::system("S"), Message::user("orphan")])
            .unwrap();

        let readonly = std::fs::Permissions::from_mode(0o555);
        std::fs::set_permissions(dir.path(), readonly).unwrap();
        // Privileged users can still rename inside a read-only directory.
        let writable = std::fs::write(dir.path().join("canary"), "").is_ok();
        if !writable {
            let mut s = session(dir.path(), WindowBudget::unbounded());
            assert!(matches!(
                s.load(Message::system("S")).await,
                Err(LedgerError::PersistenceFailure { .. })
            ));
            assert_eq!(s.state(), SessionState::Uninitialized);
            assert!(s.window().is_empty());
            assert!(s.transcript().is_empty());
            assert!(store.exists(&key));
        }
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn save_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();
        let mut s = session(&blocker, WindowBudget::unbounded());
        s.load(Message::system("S")).await.unwrap();
        assert!(!s.save());
        assert_eq!(s.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn output_and_print_filter_roles() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), WindowBudget::unbounded());
        s.load(Message::system("S")).await.unwrap();
        s.enqueue(Message::user("u")).await.unwrap();
        s.enqueue(Message::function("f", "result")).await.unwrap();
        s.enqueue(Message::assistant("a")).await.unwrap();

        assert_eq!(s.output(None).len(), 4);
        assert_eq!(contents(&s.output(Some(&[Role::User]))), ["u"]);

        let mut buf = Vec::new();
        s.write_to(&mut buf, None).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "system\nS\n\nuser\nu\n\nassistant\na\n\n");
    }

    #[tokio::test]
    async fn closed_session_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), WindowBudget::unbounded());
        s.load(Message::system("S")).await.unwrap();
        s.close();
        assert!(matches!(
            s.enqueue(Message::user("late")).await,
            Err(LedgerError::SessionClosed(_))
        ));
        assert!(!s.save());
    }

    #[tokio::test]
    async fn evicted_messages_can_be_recalled() {
        let dir = tempfile::tempdir().unwrap();
        let model: Arc<dyn ChatModel> = Arc::new(Echo);
        let vectors = Arc::new(LocalVectorStore::in_memory(
            "chat",
            Arc::new(ModelEmbedder::new(model.clone())),
        ));
        let mut s = SessionManager::new(
            "s",
            LedgerStore::new(dir.path()),
            WindowBudget::messages(2),
            model,
        )
        .unwrap()
        .with_recall(vectors.clone());

        s.load(Message::system("S")).await.unwrap();
        s.enqueue(Message::user("the blue door")).await.unwrap();
        s.enqueue(Message::user("next")).await.unwrap();

        assert_eq!(vectors.count().await.unwrap(), 1);
        let recalled = s.recall("the blue door", 1).await;
        assert_eq!(contents(&recalled), ["the blue door"]);
        assert_eq!(recalled[0].role, Role::User);
    }

    #[tokio::test]
    async fn recall_without_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(dir.path(), WindowBudget::unbounded());
        assert!(s.recall("anything", 3).await.is_empty());
    }
}
