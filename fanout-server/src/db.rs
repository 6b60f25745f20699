//! SQLite persistence for conversation history.
//!
//! One append-only `conversations` table keyed by session id. Every
//! statement auto-commits; there are no transactions spanning calls.

use std::path::Path;

use rusqlite::{Connection, Result as SqlResult, params};
use serde::{Deserialize, Serialize};

/// Who produced a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    User,
    Bot,
    Brainstorm,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Bot => "bot",
            Self::Brainstorm => "brainstorm",
        }
    }
}

/// A row as returned by history fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub provider: String,
    pub message: String,
    pub timestamp: String,
}

/// Database handle wrapping a SQLite connection.
pub struct Db {
    conn: Connection,
}

impl Db {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> SqlResult<()> {
        self.conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS conversations (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                provider   TEXT NOT NULL,
                message    TEXT NOT NULL,
                type       TEXT NOT NULL DEFAULT 'bot'
                           CHECK (type IN ('user', 'bot', 'brainstorm')),
                timestamp  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_session
                ON conversations(session_id, id);
            ",
        )?;
        Ok(())
    }

    pub fn insert_entry(
        &self,
        session_id: &str,
        provider: &str,
        message: &str,
        kind: EntryKind,
        timestamp: &str,
    ) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO conversations (session_id, provider, message, type, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, provider, message, kind.as_str(), timestamp],
        )?;
        Ok(())
    }

    /// Fetch up to `limit` entries for a session in insertion order.
    pub fn get_history(&self, session_id: &str, limit: usize) -> SqlResult<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT provider, message, timestamp
             FROM conversations
             WHERE session_id = ?1
             ORDER BY id ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![session_id, limit as i64], |row| {
            Ok(HistoryEntry {
                provider: row.get(0)?,
                message: row.get(1)?,
                timestamp: row.get(2)?,
            })
        })?;
        let entries = rows.collect::<SqlResult<Vec<_>>>()?;
        Ok(entries)
    }

    /// Delete every entry for a session. Returns the number of rows removed.
    pub fn clear_session(&self, session_id: &str) -> SqlResult<usize> {
        self.conn.execute(
            "DELETE FROM conversations WHERE session_id = ?1",
            params![session_id],
        )
    }
}
