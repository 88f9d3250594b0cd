//! Durable ledger storage.
//!
//! Every ledger is addressed by a [`LedgerKey`] (the session name plus the
//! ledger kind), which [`LedgerStore`] resolves to a file under its root:
//!
//! ```text
//! root/
//!   demo_context.json
//!   demo_transcript.json
//! ```
//!
//! Writes go through a temp file and a rename so a crash never leaves a
//! half-written ledger behind.

use crate::Message;
use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Which of a session's two ledgers a file holds.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    Context,
    Transcript,
}

impl LedgerKind {
    pub const ALL: [LedgerKind; 2] = [LedgerKind::Context, LedgerKind::Transcript];

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::Context => "context",
            LedgerKind::Transcript => "transcript",
        }
    }

    fn file_suffix(&self) -> String {
        format!("_{}.json", self.as_str())
    }
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage address of one ledger.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    pub session: String,
    pub kind: LedgerKind,
}

impl LedgerKey {
    pub fn new(session: impl Into<String>, kind: LedgerKind) -> Self {
        Self {
            session: session.into(),
            kind,
        }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session, self.kind)
    }
}

/// Whether `name` can be used as a session name: non-empty, and made only of
/// characters that are safe inside a single file name.
pub fn is_valid_session_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Resolves ledger keys to files and reads/writes them.
#[derive(Clone, Debug)]
pub struct LedgerStore {
    root: PathBuf,
}

impl LedgerStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `key`.
    pub fn path_for(&self, key: &LedgerKey) -> PathBuf {
        self.root
            .join(format!("{}{}", key.session, key.kind.file_suffix()))
    }

    pub fn exists(&self, key: &LedgerKey) -> bool {
        self.path_for(key).exists()
    }

    fn failure(key: &LedgerKey, reason: String) -> LedgerError {
        LedgerError::PersistenceFailure {
            key: key.to_string(),
            reason,
        }
    }

    /// Read a ledger. `Ok(None)` when no file exists; an error when the file
    /// exists but cannot be read or parsed.
    pub fn read(&self, key: &LedgerKey) -> Result<Option<Vec<Message>>, LedgerError> {
        let path = self.path_for(key);
        if !path.exists() {
            debug!("No stored ledger at {}", path.display());
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)
            .map_err(|e| Self::failure(key, format!("failed to read {}: {e}", path.display())))?;
        let messages: Vec<Message> = serde_json::from_str(&json)
            .map_err(|e| Self::failure(key, format!("failed to parse {}: {e}", path.display())))?;
        Ok(Some(messages))
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    pub fn write(&self, key: &LedgerKey, messages: &[Message]) -> Result<(), LedgerError> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| Self::failure(key, format!("failed to create ledger dir: {e}")))?;

        let final_path = self.path_for(key);
        let tmp_path = self
            .root
            .join(format!(".{}_{}.json.tmp", key.session, key.kind));

        let json = serde_json::to_string_pretty(messages)
            .map_err(|e| Self::failure(key, format!("failed to serialize ledger: {e}")))?;
        std::fs::write(&tmp_path, json)
            .map_err(|e| Self::failure(key, format!("failed to write temp ledger: {e}")))?;
        std::fs::rename(&tmp_path, &final_path)
            .map_err(|e| Self::failure(key, format!("failed to rename ledger: {e}")))?;

        debug!("Wrote {} message(s) to {}", messages.len(), final_path.display());
        Ok(())
    }

    /// Move a ledger file out of the way, keeping it on disk under a
    /// timestamped `.stale` name. Returns the new path, or `None` if there
    /// was no file.
    pub fn set_aside(&self, key: &LedgerKey) -> Result<Option<PathBuf>, LedgerError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.f");
        let stale = path.with_extension(format!("json.stale-{stamp}"));
        std::fs::rename(&path, &stale)
            .map_err(|e| Self::failure(key, format!("failed to set aside ledger: {e}")))?;
        warn!("Set aside {} as {}", path.display(), stale.display());
        Ok(Some(stale))
    }

    /// Names of all sessions with at least one ledger file, sorted.
    pub fn list_sessions(&self) -> Result<Vec<String>, LedgerError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.root).map_err(|e| LedgerError::PersistenceFailure {
            key: self.root.display().to_string(),
            reason: format!("failed to read ledger dir: {e}"),
        })?;

        let mut sessions = BTreeSet::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            for kind in LedgerKind::ALL {
                if let Some(session) = name.strip_suffix(&kind.file_suffix())
                    && is_valid_session_name(session)
                {
                    sessions.insert(session.to_string());
                }
            }
        }
        Ok(sessions.into_iter().collect())
    }

    /// Delete both ledger files of a session. Missing files are not an error.
    pub fn delete_session(&self, session: &str) -> Result<(), LedgerError> {
        for kind in LedgerKind::ALL {
            let key = LedgerKey::new(session, kind);
            let path = self.path_for(&key);
            if path.exists() {
                std::fs::remove_file(&path)
                    .map_err(|e| Self::failure(&key, format!("failed to delete ledger: {e}")))?;
            }
        }
        Ok(())
    }
}
