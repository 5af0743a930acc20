//! Loading and saving the session a run continues.

use crate::loop_runner::{RunOutcome, RunStatus};
use chrono::Local;
use opsclaw_core::session::session_title;
use opsclaw_core::{SessionError, SessionRecord, SessionStore, Turn, short_id};
use tracing::{debug, info};

/// The session a run belongs to.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: String,
    /// The stored session when the run continues one.
    pub existing: Option<SessionRecord>,
}

impl SessionHandle {
    /// Messages to continue from; empty for a new session.
    pub fn history(&self) -> Vec<opsclaw_core::Message> {
        self.existing
            .as_ref()
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }
}

/// Local time, ISO 8601 with microseconds. Sorts lexicographically.
pub fn timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Resolve `requested` to a stored session, or start a new one.
///
/// An id that is not stored starts a fresh session under a new id.
pub async fn resume(
    store: &dyn SessionStore,
    requested: Option<&str>,
) -> Result<SessionHandle, SessionError> {
    let requested = requested.map(str::trim).filter(|id| !id.is_empty());
    if let Some(id) = requested {
        if let Some(existing) = store.get(id).await? {
            debug!(session_id = id, messages = existing.messages.len(), "Continuing session");
            return Ok(SessionHandle {
                id: id.to_string(),
                existing: Some(existing),
            });
        }
        debug!(session_id = id, "Session not found, starting a new one");
    }
    Ok(SessionHandle {
        id: short_id(),
        existing: None,
    })
}

/// Save the run's conversation, and a turn unless the run failed.
pub async fn record(
    store: &dyn SessionStore,
    session: &SessionHandle,
    instruction: &str,
    asset_select: Option<String>,
    outcome: &RunOutcome,
) -> Result<(), SessionError> {
    let now = timestamp();
    let (title, created_at) = match &session.existing {
        Some(existing) => (existing.title.clone(), existing.created_at.clone()),
        None => (session_title(instruction), now.clone()),
    };
    let turn = (outcome.status != RunStatus::Failed).then(|| Turn {
        user: instruction.trim().to_string(),
        commands: outcome.commands.clone(),
        reply: outcome.reply.clone(),
        asset_select,
    });
    store
        .save(
            &session.id,
            &title,
            &created_at,
            &now,
            &outcome.conversation.messages,
            turn,
        )
        .await?;
    info!(
        trace_id = %outcome.trace_id,
        session_id = %session.id,
        messages = outcome.conversation.len(),
        "Session saved"
    );
    Ok(())
}
