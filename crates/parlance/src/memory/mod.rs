//! Conversation memory: the two ledgers and the session that pairs them.
//!
//! 1. **[`window`]**: [`ContextWindow`], the bounded ledger sent to the
//!    backend. Evicts the oldest non-system message (FIFO) when over
//!    [`budget`], handing each evicted message to an [`EvictionHook`].
//! 2. **[`transcript`]**: [`Transcript`], the unbounded append-only ledger.
//!    Always an order-preserving superset of the window.
//! 3. **[`session`]**: [`SessionManager`], which fans every write out to
//!    both ledgers (window first), seeds or resumes them, and saves them.
//! 4. **[`store`]**: [`LedgerStore`], resolving `(session, kind)` keys to
//!    files and doing atomic reads and writes.
//! 5. **[`registry`]**: [`SessionRegistry`], one lock per session for
//!    hosts that serve several sessions at once.

pub mod budget;
pub mod registry;
pub mod session;
pub mod store;
pub mod transcript;
pub mod window;

pub use budget::{DEFAULT_CHARS_PER_TOKEN, WindowBudget, WindowUsage};
pub use registry::{SessionRegistry, SharedSession};
pub use session::{SessionManager, SessionState};
pub use store::{LedgerKey, LedgerKind, LedgerStore};
pub use transcript::Transcript;
pub use window::{ContextWindow, EvictionHook, HookFuture};

use crate::Message;
use crate::error::LedgerError;

/// Check that `message` may be appended to a ledger whose head is `head`.
///
/// A ledger starts with exactly one system message and never holds a second.
pub(crate) fn check_admissible(head: Option<&Message>, message: &Message) -> Result<(), LedgerError> {
    match head {
        None if !message.is_system() => Err(LedgerError::MissingSystemMessage(message.role)),
        Some(_) if message.is_system() => Err(LedgerError::DuplicateSystemMessage),
        _ => Ok(()),
    }
}

/// Validate a sequence read back from storage.
pub(crate) fn check_sequence<'a>(
    key: &LedgerKey,
    messages: impl IntoIterator<Item = &'a Message>,
) -> Result<(), LedgerError> {
    let mut head = None;
    for message in messages {
        check_admissible(head, message).map_err(|e| LedgerError::PersistenceFailure {
            key: key.to_string(),
            reason: format!("stored sequence is inconsistent: {e}"),
        })?;
        head.get_or_insert(message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_message_must_be_system() {
        let err = check_admissible(None, &Message::user("hi")).unwrap_err();
        assert!(matches!(err, LedgerError::MissingSystemMessage(crate::Role::User)));
        assert!(check_admissible(None, &Message::system("sys")).is_ok());
    }

    #[test]
    fn second_system_message_rejected() {
        let sys = Message::system("sys");
        let err = check_admissible(Some(&sys), &Message::system("again")).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateSystemMessage));
        assert!(check_admissible(Some(&sys), &Message::assistant("ok")).is_ok());
    }

    #[test]
    fn stored_sequence_checked_as_persistence_failure() {
        let key = LedgerKey::new("s", LedgerKind::Context);
        let bad = [Message::user("no system first")];
        let err = check_sequence(&key, &bad).unwrap_err();
        assert!(matches!(err, LedgerError::PersistenceFailure { .. }));

        let good = [Message::system("sys"), Message::user("hi")];
        assert!(check_sequence(&key, &good).is_ok());
    }
}
