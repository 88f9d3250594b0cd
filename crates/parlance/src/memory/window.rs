//! Bounded context window ledger.
//!
//! The window holds the messages that are actually sent to the backend. Its
//! head is the session's system message, which is never evicted. When an
//! append pushes the window over its [`WindowBudget`], the oldest non-system
//! messages are evicted in FIFO order until it fits again. Each evicted
//! message is handed to the registered [`EvictionHook`] once the append and
//! all evictions are complete, so a slow or failing hook never observes a
//! half-updated window.

use super::budget::{WindowBudget, WindowUsage};
use super::store::{LedgerKey, LedgerKind, LedgerStore};
use super::{check_admissible, check_sequence};
use crate::Message;
use crate::error::LedgerError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Boxed future returned by [`EvictionHook::on_evict`].
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Receives every message the window evicts.
///
/// Hooks cannot fail the enqueue that triggered them: a hook that cannot do
/// its job logs and returns.
pub trait EvictionHook: Send + Sync {
    fn on_evict<'a>(&'a self, message: &'a Message) -> HookFuture<'a>;
}

/// The bounded, order-preserving ledger sent to the backend.
pub struct ContextWindow {
    key: LedgerKey,
    store: LedgerStore,
    budget: WindowBudget,
    messages: Vec<Message>,
    hook: Option<Arc<dyn EvictionHook>>,
}

impl ContextWindow {
    pub fn new(session: impl Into<String>, store: LedgerStore, budget: WindowBudget) -> Self {
        Self {
            key: LedgerKey::new(session, LedgerKind::Context),
            store,
            budget,
            messages: Vec::new(),
            hook: None,
        }
    }

    /// Register the hook that receives evicted messages.
    pub fn with_eviction_hook(mut self, hook: Arc<dyn EvictionHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn set_eviction_hook(&mut self, hook: Arc<dyn EvictionHook>) {
        self.hook = Some(hook);
    }

    pub fn key(&self) -> &LedgerKey {
        &self.key
    }

    pub fn budget(&self) -> &WindowBudget {
        &self.budget
    }

    pub fn usage(&self) -> WindowUsage {
        self.budget.estimate_usage(&self.messages)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    /// Deep copy of the current contents.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub(crate) fn head(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub(crate) fn clear(&mut self) {
        self.messages.clear();
    }

    // ── Mutation ───────────────────────────────────────────────────

    /// Append `message`, then evict until the window fits its budget.
    ///
    /// Returns the evicted messages, oldest first.
    pub async fn enqueue(&mut self, message: Message) -> Result<Vec<Message>, LedgerError> {
        check_admissible(self.head(), &message)?;
        debug!("[{}] enqueue {} message", self.key, message.role);
        self.messages.push(message);

        let evicted = self.enforce_budget();
        self.archive(&evicted).await;
        Ok(evicted)
    }

    /// Remove and return the oldest non-system message.
    ///
    /// Explicit removal is not eviction: the hook is not notified.
    pub fn dequeue(&mut self) -> Result<Message, LedgerError> {
        if self.messages.len() < 2 {
            return Err(LedgerError::EmptyLedger);
        }
        Ok(self.messages.remove(1))
    }

    /// The system message at the head, if the window has been seeded.
    pub fn system_message(&self) -> Option<&Message> {
        self.head().filter(|m| m.is_system())
    }

    /// Replace the system message, or insert it when the window is empty.
    ///
    /// A longer system message can push the window over budget, in which
    /// case the oldest messages are evicted exactly as on enqueue.
    pub async fn set_system_message(&mut self, message: Message) -> Result<Vec<Message>, LedgerError> {
        if !message.is_system() {
            return Err(LedgerError::NotSystemRole(message.role));
        }
        match self.messages.first_mut() {
            Some(head) => *head = message,
            None => self.messages.push(message),
        }

        let evicted = self.enforce_budget();
        self.archive(&evicted).await;
        Ok(evicted)
    }

    /// Evict the oldest non-system messages until the window fits.
    ///
    /// The system message and the newest message are never evicted. If those
    /// two alone exceed the budget the window is left over budget.
    fn enforce_budget(&mut self) -> Vec<Message> {
        let mut usage = self.usage();
        let mut evicted = Vec::new();

        while usage.is_exceeded() && self.messages.len() > 2 {
            let message = self.messages.remove(1);
            usage.messages -= 1;
            usage.estimated_tokens = usage
                .estimated_tokens
                .saturating_sub(self.budget.estimate_message_tokens(&message));
            evicted.push(message);
        }

        if usage.is_exceeded() {
            warn!(
                "[{}] cannot fit {} by eviction; keeping system and newest message",
                self.key,
                usage.to_log_string()
            );
        }
        if !evicted.is_empty() {
            debug!(
                "[{}] evicted {} message(s), {}",
                self.key,
                evicted.len(),
                usage.to_log_string()
            );
        }
        evicted
    }

    async fn archive(&self, evicted: &[Message]) {
        let Some(hook) = &self.hook else {
            return;
        };
        for message in evicted {
            hook.on_evict(message).await;
        }
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Restore the window from storage.
    ///
    /// `Ok(false)` when there is no prior state (no file, or an empty one).
    /// A stored window larger than the current budget is trimmed without
    /// notifying the hook: those messages were archived when first evicted.
    pub fn load_to_chat_completions(&mut self) -> Result<bool, LedgerError> {
        let Some(messages) = self.store.read(&self.key)? else {
            return Ok(false);
        };
        if messages.is_empty() {
            return Ok(false);
        }
        check_sequence(&self.key, &messages)?;

        self.messages = messages;
        let trimmed = self.enforce_budget();
        if !trimmed.is_empty() {
            info!(
                "[{}] trimmed {} stored message(s) to fit the current budget",
                self.key,
                trimmed.len()
            );
        }
        debug!("[{}] loaded {}", self.key, self.usage().to_log_string());
        Ok(true)
    }

    /// Write the window to storage.
    pub fn persist(&self) -> Result<(), LedgerError> {
        self.store.write(&self.key, &self.messages)
    }

    /// Write the window to storage, logging instead of propagating failure.
    pub fn save_from_chat_completions(&self) -> bool {
        match self.persist() {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save context window: {e}");
                false
            }
        }
    }
}

impl<'a> IntoIterator for &'a ContextWindow {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
