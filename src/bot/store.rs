//! Persistent SQLite store for sessions and the conversation turn log.
//!
//! The session half lives in `session.rs` and the turn-log half in
//! `memory.rs`; both are `impl Store` blocks over the same connection.

use rusqlite::Connection;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Persistence failures, split by operation so callers can decide whether
/// to degrade (reads) or merely log (writes).
#[derive(Debug)]
pub enum StoreError {
    /// Failed to open the database or initialize its schema.
    Open(rusqlite::Error),
    /// A read query failed.
    Read(rusqlite::Error),
    /// A write failed; the user-visible reply may already be out, so the
    /// durable state can diverge from what was sent.
    Write(rusqlite::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(e) => write!(f, "failed to open store: {}", e),
            Self::Read(e) => write!(f, "store read failed: {}", e),
            Self::Write(e) => write!(f, "store write failed: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open(e) | Self::Read(e) | Self::Write(e) => Some(e),
        }
    }
}

/// SQLite-backed store for sessions and turns.
pub struct Store {
    pub(crate) conn: Mutex<Connection>,
}

impl Store {
    /// Create a new in-memory store (used by tests).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::Open)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(StoreError::Open)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;

        let (sessions, turns) = store.counts()?;
        info!("Opened store at {:?} ({} sessions, {} turns)", path, sessions, turns);
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                user_id TEXT PRIMARY KEY,
                state TEXT NOT NULL DEFAULT 'start',
                saved_name TEXT
            );

            CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_turns_user_created
                ON turns(user_id, created_at);
        "#,
        )
        .map_err(StoreError::Open)
    }

    fn counts(&self) -> Result<(usize, usize), StoreError> {
        let conn = self.conn.lock().unwrap();
        let sessions: i64 = conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            .map_err(StoreError::Read)?;
        let turns: i64 = conn
            .query_row("SELECT COUNT(*) FROM turns", [], |row| row.get(0))
            .map_err(StoreError::Read)?;
        Ok((sessions as usize, turns as usize))
    }
}
