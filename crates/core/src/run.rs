//! Live progress of one agent run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One command dispatched during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub asset_name: String,
    pub command: String,
    /// Empty until the dispatch completes.
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub asset_host: String,
}

/// Raw model output for one round, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelReply {
    pub round: u32,
    pub content: String,
}

/// Snapshot of a run, as served to status pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub trace_id: String,
    pub session_id: String,
    pub instruction: String,
    #[serde(default)]
    pub asset_names: Vec<String>,
    pub running: bool,
    pub commands: Vec<CommandRecord>,
    pub model_replies: Vec<ModelReply>,
    pub reply: String,
    pub error: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new(
        trace_id: impl Into<String>,
        session_id: impl Into<String>,
        instruction: impl Into<String>,
        asset_names: Vec<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            session_id: session_id.into(),
            instruction: instruction.into(),
            asset_names,
            running: true,
            commands: Vec::new(),
            model_replies: Vec::new(),
            reply: String::new(),
            error: String::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Record a dispatch that has started but not yet produced a result.
    pub fn command_started(&mut self, asset_name: &str, command: &str, asset_host: &str) {
        self.commands.push(CommandRecord {
            asset_name: asset_name.to_string(),
            command: command.to_string(),
            result: String::new(),
            asset_host: asset_host.to_string(),
        });
    }

    /// Attach a result to the most recent unfilled `(asset, command)` entry,
    /// or append a new entry when none is waiting.
    pub fn command_finished(&mut self, asset_name: &str, command: &str, result: &str, asset_host: &str) {
        fill_command(&mut self.commands, asset_name, command, result, asset_host);
    }

    pub fn model_replied(&mut self, round: u32, content: &str) {
        self.model_replies.push(ModelReply {
            round,
            content: content.to_string(),
        });
    }

    /// Mark the run finished with either a reply or an error.
    pub fn finish(&mut self, reply: Option<&str>, error: Option<&str>) {
        self.running = false;
        self.finished_at = Some(Utc::now());
        if let Some(reply) = reply {
            self.reply = reply.to_string();
        }
        if let Some(error) = error {
            self.error = error.to_string();
        }
    }
}

/// Most-recent-unfilled matching over a command list.
///
/// Shared by [`RunState`] and by callers that keep their own per-turn list.
pub fn fill_command(
    commands: &mut Vec<CommandRecord>,
    asset_name: &str,
    command: &str,
    result: &str,
    asset_host: &str,
) {
    let pending = commands.iter_mut().rev().find(|c| {
        c.asset_name == asset_name && c.command == command && c.result.is_empty()
    });
    match pending {
        Some(entry) => {
            entry.result = result.to_string();
            if !asset_host.is_empty() {
                entry.asset_host = asset_host.to_string();
            }
        }
        None => commands.push(CommandRecord {
            asset_name: asset_name.to_string(),
            command: command.to_string(),
            result: result.to_string(),
            asset_host: asset_host.to_string(),
        }),
    }
}
