//! Persisted session history and the store abstraction.

use crate::error::SessionError;
use crate::message::Message;
use crate::run::CommandRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One completed exchange, appended to a session after a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub user: String,
    #[serde(default)]
    pub commands: Vec<CommandRecord>,
    pub reply: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_select: Option<String>,
}

/// A full session: the raw conversation plus its chat-style turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub messages: Vec<Message>,
    pub turns: Vec<Turn>,
}

/// Listing view of a session, without the message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Storage for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// A short name for logs (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    async fn get(&self, id: &str) -> Result<Option<SessionRecord>, SessionError>;

    /// All sessions, most recently updated first.
    async fn list(&self) -> Result<Vec<SessionSummary>, SessionError>;

    /// Upsert a session. `created_at` is kept from the first save; when
    /// `new_turn` is given it is appended to the stored turns.
    async fn save(
        &self,
        id: &str,
        title: &str,
        created_at: &str,
        updated_at: &str,
        messages: &[Message],
        new_turn: Option<Turn>,
    ) -> Result<(), SessionError>;

    /// Returns whether a session was removed.
    async fn delete(&self, id: &str) -> Result<bool, SessionError>;
}

/// Title for a new session: the first 30 characters of the instruction on
/// one line, with an ellipsis when cut.
pub fn session_title(instruction: &str) -> String {
    const MAX_CHARS: usize = 30;
    let line = instruction.trim().replace('\n', " ");
    let line = line.trim();
    if line.is_empty() {
        return "新会话".to_string();
    }
    if line.chars().count() > MAX_CHARS {
        let head: String = line.chars().take(MAX_CHARS).collect();
        format!("{head}…")
    } else {
        line.to_string()
    }
}
