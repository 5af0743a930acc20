//! In-memory session store, useful for testing and throwaway gateways.

use async_trait::async_trait;
use opsclaw_core::error::SessionError;
use opsclaw_core::message::Message;
use opsclaw_core::session::{SessionRecord, SessionStore, SessionSummary, Turn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Sessions kept in a map; nothing survives the process.
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get(&self, id: &str) -> Result<Option<SessionRecord>, SessionError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let sessions = self.sessions.read().await;
        let mut out: Vec<SessionSummary> = sessions
            .values()
            .map(|s| SessionSummary {
                id: s.id.clone(),
                title: s.title.clone(),
                created_at: s.created_at.clone(),
                updated_at: s.updated_at.clone(),
            })
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
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
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .entry(id.to_string())
            .or_insert_with(|| SessionRecord {
                id: id.to_string(),
                title: title.to_string(),
                created_at: created_at.to_string(),
                updated_at: updated_at.to_string(),
                messages: Vec::new(),
                turns: Vec::new(),
            });
        entry.title = title.to_string();
        entry.updated_at = updated_at.to_string();
        entry.messages = messages.to_vec();
        if let Some(turn) = new_turn {
            entry.turns.push(turn);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }
}
