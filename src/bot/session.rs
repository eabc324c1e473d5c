//! Per-user conversation sessions.

use rusqlite::{OptionalExtension, params};

use crate::bot::store::{Store, StoreError};

/// Where a user sits in the conversation.
///
/// `Start` is both the initial state and the state the guided flow returns
/// to after completing; the machine is cyclic by design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Start,
    AwaitingName,
    AwaitingService,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Start => "start",
            SessionState::AwaitingName => "awaiting_name",
            SessionState::AwaitingService => "awaiting_service",
        }
    }

    /// Unknown values (e.g. from a flow variant no longer configured)
    /// fall back to `Start`.
    pub fn from_str(s: &str) -> Self {
        match s {
            "awaiting_name" => SessionState::AwaitingName,
            "awaiting_service" => SessionState::AwaitingService,
            _ => SessionState::Start,
        }
    }
}

/// Durable per-user conversation state. One row per canonical user id,
/// created on first contact, never deleted.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub state: SessionState,
    pub saved_name: Option<String>,
}

impl Session {
    /// In-memory fallback session used when a store read fails. Not
    /// persisted; the next event for the user sees the durable row again.
    pub fn transient(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            state: SessionState::Start,
            saved_name: None,
        }
    }
}

impl Store {
    /// Return the session for `user_id`, inserting a fresh `Start` row if
    /// none exists. `INSERT OR IGNORE` makes the creation idempotent, so
    /// two near-simultaneous first contacts cannot produce duplicates.
    pub fn get_or_create(&self, user_id: &str) -> Result<Session, StoreError> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT OR IGNORE INTO sessions (user_id, state) VALUES (?1, 'start')",
            params![user_id],
        )
        .map_err(StoreError::Write)?;

        conn.query_row(
            "SELECT user_id, state, saved_name FROM sessions WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(Session {
                    user_id: row.get(0)?,
                    state: SessionState::from_str(&row.get::<_, String>(1)?),
                    saved_name: row.get(2)?,
                })
            },
        )
        .map_err(StoreError::Read)
    }

    /// Persist a state transition. `name` replaces the saved name when
    /// given and leaves it untouched when `None`. Updating a user without a
    /// session row is a write error, not a silent no-op; it means the
    /// transition was decided against a session that is not durable.
    pub fn update(
        &self,
        user_id: &str,
        state: SessionState,
        name: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn
            .execute(
                "UPDATE sessions SET state = ?2, saved_name = COALESCE(?3, saved_name)
                 WHERE user_id = ?1",
                params![user_id, state.as_str(), name],
            )
            .map_err(StoreError::Write)?;

        if rows == 0 {
            return Err(StoreError::Write(rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get::<_, i64>(0))
            .unwrap_or(0) as usize
    }

    /// Look up a session without creating one.
    pub fn find_session(&self, user_id: &str) -> Result<Option<Session>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT user_id, state, saved_name FROM sessions WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(Session {
                    user_id: row.get(0)?,
                    state: SessionState::from_str(&row.get::<_, String>(1)?),
                    saved_name: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::Read)
    }
}
