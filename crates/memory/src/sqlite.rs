//! SQLite session store.
//!
//! One table, `sessions`, with the conversation and turns stored as JSON
//! text. Saving is an upsert that preserves the original `created_at`.

use async_trait::async_trait;
use opsclaw_core::error::SessionError;
use opsclaw_core::message::Message;
use opsclaw_core::session::{SessionRecord, SessionStore, SessionSummary, Turn};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A SQLite-backed [`SessionStore`].
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Open (creating if needed) the database at `path`.
    ///
    /// Pass `":memory:"` for an ephemeral database; the pool is then limited
    /// to a single connection so every query sees the same data.
    pub async fn new(path: &str) -> Result<Self, SessionError> {
        let in_memory = path.contains(":memory:");
        let url = if in_memory || path.starts_with("sqlite:") {
            path.to_string()
        } else {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        SessionError::Storage(format!("Cannot create {}: {e}", parent.display()))
                    })?;
                }
            }
            format!("sqlite://{path}")
        };

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| SessionError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .connect_with(options)
            .await
            .map_err(|e| SessionError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite session store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, SessionError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), SessionError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id          TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                messages    TEXT NOT NULL,
                turns       TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::Storage(format!("sessions table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_updated_at ON sessions(updated_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::Storage(format!("updated_at index: {e}")))?;

        Ok(())
    }

    async fn stored_turns(&self, id: &str) -> Result<Vec<Turn>, SessionError> {
        let row = sqlx::query("SELECT turns FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        match row {
            Some(row) => {
                let raw: String = row
                    .try_get("turns")
                    .map_err(|e| SessionError::Storage(e.to_string()))?;
                parse_json(&raw)
            }
            None => Ok(Vec::new()),
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned + Default>(raw: &str) -> Result<T, SessionError> {
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(raw).map_err(|e| SessionError::Serialization(e.to_string()))
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, SessionError> {
    serde_json::to_string(value).map_err(|e| SessionError::Serialization(e.to_string()))
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, id: &str) -> Result<Option<SessionRecord>, SessionError> {
        let row = sqlx::query(
            "SELECT id, title, created_at, updated_at, messages, turns FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SessionError::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let get = |col: &str| -> Result<String, SessionError> {
            row.try_get::<String, _>(col)
                .map_err(|e| SessionError::Storage(e.to_string()))
        };

        Ok(Some(SessionRecord {
            id: get("id")?,
            title: get("title")?,
            created_at: get("created_at")?,
            updated_at: get("updated_at")?,
            messages: parse_json(&get("messages")?)?,
            turns: parse_json(&get("turns")?)?,
        }))
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let rows = sqlx::query(
            "SELECT id, title, created_at, updated_at FROM sessions ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SessionError::Storage(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(SessionSummary {
                    id: row.try_get("id").map_err(|e| SessionError::Storage(e.to_string()))?,
                    title: row
                        .try_get("title")
                        .map_err(|e| SessionError::Storage(e.to_string()))?,
                    created_at: row
                        .try_get("created_at")
                        .map_err(|e| SessionError::Storage(e.to_string()))?,
                    updated_at: row
                        .try_get("updated_at")
                        .map_err(|e| SessionError::Storage(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn save(
        &self,
        id: &str,
        title: &str,
        created_at: &str,
        updated_at: &str,
        messages: &[Message],
        new_turn: Option<Turn>,
    ) -> Result<(), SessionError> {
        let mut turns = self.stored_turns(id).await?;
        if let Some(turn) = new_turn {
            turns.push(turn);
        }

        sqlx::query(
            r#"
            INSERT INTO sessions (id, title, created_at, updated_at, messages, turns)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                updated_at = excluded.updated_at,
                messages = excluded.messages,
                turns = excluded.turns
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(created_at)
        .bind(updated_at)
        .bind(to_json(messages)?)
        .bind(to_json(&turns)?)
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::Storage(e.to_string()))?;

        debug!(session_id = id, turns = turns.len(), "Session saved");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, SessionError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}
