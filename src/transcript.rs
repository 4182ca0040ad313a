//! Chat transcript archive.
//!
//! The archive is a JSON array of [`ChatSession`] under
//! [`KEY_CHAT_HISTORY`], most-recent-first and capped at `limit` entries.
//! Writes are best-effort: a failing store is logged and the caller carries
//! on with its in-memory session untouched.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::session::ChatSession;
use crate::store::{KeyValueStore, KEY_CHAT_HISTORY};

/// Default number of sessions kept in the archive.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// What [`TranscriptStore::save`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing worth archiving yet.
    Skipped,
    Inserted,
    Updated,
    /// The archive could not be written; the failure was logged.
    Failed,
}

#[derive(Clone)]
pub struct TranscriptStore {
    store: Arc<dyn KeyValueStore>,
    limit: usize,
}

impl TranscriptStore {
    pub fn new(store: Arc<dyn KeyValueStore>, limit: usize) -> Self {
        Self {
            store,
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Read the archive. Missing or unreadable data reads as empty; single
    /// entries that do not decode are skipped.
    pub fn list(&self) -> Vec<ChatSession> {
        match self.raw_entries() {
            Ok(entries) => entries.into_iter().filter_map(decode_entry).collect(),
            Err(e) => {
                warn!(error = %e, "chat history unreadable, treating as empty");
                Vec::new()
            }
        }
    }

    /// The archive as stored, one JSON value per session.
    fn raw_entries(&self) -> Result<Vec<Value>, ChatError> {
        match self.store.get(KEY_CHAT_HISTORY)? {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
            _ => Ok(Vec::new()),
        }
    }

    pub fn find_by_id(&self, id: &str) -> Option<ChatSession> {
        self.list().into_iter().find(|s| s.id == id)
    }

    /// Insert or replace `session` at the front of the archive and persist.
    ///
    /// Sessions without eligible messages are skipped. Write failures are
    /// logged and reported as [`SaveOutcome::Failed`].
    pub fn save(&self, session: &ChatSession) -> SaveOutcome {
        match self.try_save(session) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, session_id = %session.id, "failed to save chat history");
                SaveOutcome::Failed
            }
        }
    }

    /// Like [`save`](Self::save) but surfaces the store error.
    pub fn try_save(&self, session: &ChatSession) -> Result<SaveOutcome, ChatError> {
        if !session.has_eligible_messages() {
            debug!(session_id = %session.id, "no messages to save");
            return Ok(SaveOutcome::Skipped);
        }

        // Entries this build cannot decode are carried over untouched. Only
        // a document that is not a JSON array at all is replaced; a store
        // that cannot be read is never written over.
        let mut archive = match self.raw_entries() {
            Ok(entries) => entries,
            Err(ChatError::Serialization(e)) => {
                warn!(error = %e, "chat history is not a JSON array, starting a new archive");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let before = archive.len();
        archive.retain(|entry| entry.get("id").and_then(Value::as_str) != Some(session.id.as_str()));
        let outcome = if archive.len() < before {
            SaveOutcome::Updated
        } else {
            SaveOutcome::Inserted
        };

        archive.insert(0, serde_json::to_value(session)?);
        archive.truncate(self.limit);

        let json = serde_json::to_string(&archive)?;
        self.store.set(KEY_CHAT_HISTORY, &json)?;
        debug!(
            session_id = %session.id,
            total = archive.len(),
            ?outcome,
            "chat history saved"
        );
        Ok(outcome)
    }
}

fn decode_entry(entry: Value) -> Option<ChatSession> {
    let id = entry.get("id").and_then(Value::as_str).unwrap_or("?").to_string();
    match serde_json::from_value(entry) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!(error = %e, session_id = %id, "skipping unreadable chat history entry");
            None
        }
    }
}
