//! Per-nick memory backed by SQLite.
//!
//! Every reply the bridge posts is stored as a fact for the nick that asked.
//! Recent facts are replayed to the relay as context on the next question.

use std::path::Path;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::Connection;

/// A remembered exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fact {
    pub provider: String,
    pub message: String,
}

pub struct Memory {
    db: Mutex<Connection>,
}

impl Memory {
    /// Open or create a memory database.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Connection::open(path).context("Failed to open memory database")?;
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS memory (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                message TEXT NOT NULL,
                type TEXT NOT NULL DEFAULT 'bot',
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memory_session
                ON memory(session_id, id);",
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    pub fn save_fact(&self, session_id: &str, provider: &str, message: &str) -> Result<()> {
        let db = self.db.lock();
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        db.execute(
            "INSERT INTO memory (session_id, provider, message, type, timestamp)
             VALUES (?1, ?2, ?3, 'bot', ?4)",
            rusqlite::params![session_id, provider, message, now],
        )?;
        Ok(())
    }

    /// Most recent facts first.
    pub fn recall_facts(&self, session_id: &str, limit: usize) -> Result<Vec<Fact>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT provider, message FROM memory
             WHERE session_id = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let facts = stmt
            .query_map(rusqlite::params![session_id, limit as i64], |row| {
                Ok(Fact {
                    provider: row.get(0)?,
                    message: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(facts)
    }
}

/// Render up to `window` of the newest facts, oldest first, one
/// `provider: message` per line. `facts` is newest first.
pub fn memory_context(facts: &[Fact], window: usize) -> String {
    facts
        .iter()
        .take(window)
        .rev()
        .map(|f| format!("{}: {}", f.provider, f.message))
        .collect::<Vec<_>>()
        .join("\n")
}
