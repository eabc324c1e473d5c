//! Append-only conversation turn log with a bounded recency window.
//!
//! Every logged turn stays in the table for audit; only the most recent
//! `k` per user are handed to the assistant. Nothing here summarizes or
//! compacts dropped turns.

use chrono::Utc;
use rusqlite::params;

use crate::bot::store::{Store, StoreError};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

/// One logged conversational exchange. Never mutated after insertion.
#[derive(Debug, Clone)]
pub struct Turn {
    pub user_id: String,
    pub role: Role,
    pub content: String,
    /// Millisecond timestamp, strictly increasing per user.
    pub created_at: i64,
}

impl Store {
    /// Append one turn with a timestamp strictly greater than the user's
    /// previous turn. Wall-clock ties (or regressions) bump by 1 ms so the
    /// per-user total order holds even under rapid appends.
    pub fn append_turn(&self, user_id: &str, role: Role, content: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        let prev: Option<i64> = conn
            .query_row(
                "SELECT MAX(created_at) FROM turns WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .map_err(StoreError::Read)?;

        let now = Utc::now().timestamp_millis();
        let created_at = match prev {
            Some(p) if now <= p => p + 1,
            _ => now,
        };

        conn.execute(
            "INSERT INTO turns (user_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, role.as_str(), content, created_at],
        )
        .map_err(StoreError::Write)?;
        Ok(())
    }

    /// The most recent `k` turns for `user_id`, oldest-first.
    ///
    /// Queried newest-first with a LIMIT, then reversed; callers rely on
    /// oldest-first order when building assistant context.
    pub fn recent_turns(&self, user_id: &str, k: usize) -> Result<Vec<Turn>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT user_id, role, content, created_at FROM turns
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2",
            )
            .map_err(StoreError::Read)?;

        let rows = stmt
            .query_map(params![user_id, k as i64], |row| {
                Ok(Turn {
                    user_id: row.get(0)?,
                    role: Role::from_str(&row.get::<_, String>(1)?),
                    content: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .map_err(StoreError::Read)?;

        let mut turns = Vec::new();
        for row in rows {
            turns.push(row.map_err(StoreError::Read)?);
        }

        turns.reverse();
        Ok(turns)
    }

    #[cfg(test)]
    pub fn turn_count(&self, user_id: &str) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM turns WHERE user_id = ?1",
            params![user_id],
            |row| row.get::<_, i64>(0),
        )
        .unwrap_or(0) as usize
    }
}
