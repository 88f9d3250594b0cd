//! Unbounded transcript ledger.
//!
//! Append-only record of every message in a session. Nothing is ever removed,
//! so the transcript is always an order-preserving superset of the context
//! window.

use super::store::{LedgerKey, LedgerKind, LedgerStore};
use super::{check_admissible, check_sequence};
use crate::Message;
use crate::error::LedgerError;
use tracing::{debug, error};

pub struct Transcript {
    key: LedgerKey,
    store: LedgerStore,
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new(session: impl Into<String>, store: LedgerStore) -> Self {
        Self {
            key: LedgerKey::new(session, LedgerKind::Transcript),
            store,
            messages: Vec::new(),
        }
    }

    pub fn key(&self) -> &LedgerKey {
        &self.key
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

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub(crate) fn head(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub(crate) fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn enqueue(&mut self, message: Message) -> Result<(), LedgerError> {
        check_admissible(self.head(), &message)?;
        debug!("[{}] append {} message", self.key, message.role);
        self.messages.push(message);
        Ok(())
    }

    pub fn system_message(&self) -> Option<&Message> {
        self.head().filter(|m| m.is_system())
    }

    /// Replace the system message, or insert it when the transcript is empty.
    pub fn set_system_message(&mut self, message: Message) -> Result<(), LedgerError> {
        if !message.is_system() {
            return Err(LedgerError::NotSystemRole(message.role));
        }
        match self.messages.first_mut() {
            Some(head) => *head = message,
            None => self.messages.push(message),
        }
        Ok(())
    }

    /// Restore the transcript from storage. `Ok(false)` when there is no
    /// prior state.
    pub fn load_to_chat_completions(&mut self) -> Result<bool, LedgerError> {
        let Some(messages) = self.store.read(&self.key)? else {
            return Ok(false);
        };
        if messages.is_empty() {
            return Ok(false);
        }
        check_sequence(&self.key, &messages)?;
        debug!("[{}] loaded {} message(s)", self.key, messages.len());
        self.messages = messages;
        Ok(true)
    }

    pub fn persist(&self) -> Result<(), LedgerError> {
        self.store.write(&self.key, &self.messages)
    }

    pub fn save_from_chat_completions(&self) -> bool {
        match self.persist() {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save transcript: {e}");
                false
            }
        }
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
