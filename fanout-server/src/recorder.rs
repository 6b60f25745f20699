//! Best-effort session history on top of [`Db`].
//!
//! Appends and fetches never fail from the caller's point of view: a
//! storage outage degrades history, it does not block replies.

use parking_lot::Mutex;

use crate::db::{Db, EntryKind, HistoryEntry};
use crate::error::RelayError;
use crate::fanout::now_str;

pub struct Recorder {
    db: Option<Mutex<Db>>,
}

impl Recorder {
    pub fn new(db: Option<Db>) -> Self {
        Self {
            db: db.map(Mutex::new),
        }
    }

    /// A recorder with no storage behind it.
    pub fn disabled() -> Self {
        Self { db: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.db.is_some()
    }

    /// Run a closure with the database, if persistence is enabled.
    /// Logs errors but does not propagate them.
    pub fn with_db<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&Db) -> rusqlite::Result<R>,
    {
        self.db.as_ref().and_then(|db| {
            let db = db.lock();
            match f(&db) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::error!("Database error: {e}");
                    None
                }
            }
        })
    }

    pub fn append(&self, session_id: &str, provider: &str, message: &str, kind: EntryKind) {
        self.append_at(session_id, provider, message, kind, &now_str());
    }

    pub fn append_at(
        &self,
        session_id: &str,
        provider: &str,
        message: &str,
        kind: EntryKind,
        timestamp: &str,
    ) {
        self.with_db(|db| db.insert_entry(session_id, provider, message, kind, timestamp));
    }

    /// Oldest-first history, empty when storage is off or failing.
    pub fn fetch(&self, session_id: &str, limit: usize) -> Vec<HistoryEntry> {
        self.with_db(|db| db.get_history(session_id, limit))
            .unwrap_or_default()
    }

    pub fn clear(&self, session_id: &str) -> Result<usize, RelayError> {
        let Some(db) = self.db.as_ref() else {
            return Err(RelayError::Storage("history is disabled".to_string()));
        };
        let deleted = db
            .lock()
            .clear_session(session_id)
            .map_err(|e| RelayError::Storage(e.to_string()))?;
        tracing::info!(session_id, deleted, "Cleared session history");
        Ok(deleted)
    }
}
