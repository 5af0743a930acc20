//! Run progress events.
//!
//! `RunEvent` is what the agent loop reports while it works; the gateway
//! forwards each one over SSE as `event: <kind>\ndata: <json>\n\n`.
//!
//! Serialization is untagged: the JSON is just the payload, the kind travels
//! in the SSE `event:` line.
//! - `start`:         trace and session ids
//! - `command_start`: a command is about to run
//! - `command`:       that command finished
//! - `model_reply`:   raw model output for one round
//! - `reply`:         the final answer
//! - `error`:         the run failed

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RunEvent {
    Start {
        trace_id: String,
        session_id: String,
    },

    CommandStart {
        asset_name: String,
        command: String,
        asset_host: String,
    },

    Command {
        asset_name: String,
        command: String,
        asset_host: String,
        result: String,
    },

    ModelReply { round: u32, content: String },

    Reply { reply: String },

    Error { detail: String },
}

impl RunEvent {
    /// SSE event name.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::CommandStart { .. } => "command_start",
            Self::Command { .. } => "command",
            Self::ModelReply { .. } => "model_reply",
            Self::Reply { .. } => "reply",
            Self::Error { .. } => "error",
        }
    }

    /// `reply` and `error` end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Reply { .. } | Self::Error { .. })
    }

    /// The JSON payload.
    pub fn data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Receives progress from a running loop.
///
/// Implementations must not block; the loop calls this inline.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: RunEvent);
}

/// Discards everything.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: RunEvent) {}
}

/// Forwards events into an unbounded channel; a closed receiver is ignored.
impl ProgressSink for tokio::sync::mpsc::UnboundedSender<RunEvent> {
    fn emit(&self, event: RunEvent) {
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_payload() {
        let event = RunEvent::Start {
            trace_id: "abc123def456".into(),
            session_id: "0011aabbccdd".into(),
        };
        assert_eq!(event.event_type(), "start");
        assert_eq!(
            event.data(),
            r#"{"trace_id":"abc123def456","session_id":"0011aabbccdd"}"#
        );
    }

    #[test]
    fn command_payload_adds_result() {
        let event = RunEvent::Command {
            asset_name: "web-01".into(),
            command: "uptime".into(),
            asset_host: "ops@10.0.0.1:22".into(),
            result: "up 3 days".into(),
        };
        let v: serde_json::Value = serde_json::from_str(&event.data()).unwrap();
        assert_eq!(v["asset_name"], "web-01");
        assert_eq!(v["asset_host"], "ops@10.0.0.1:22");
        assert_eq!(v["result"], "up 3 days");
        assert!(v.get("type").is_none());
    }

    #[test]
    fn model_reply_and_terminal_kinds() {
        let event = RunEvent::ModelReply {
            round: 2,
            content: "{}".into(),
        };
        assert_eq!(event.data(), r#"{"round":2,"content":"{}"}"#);
        assert!(!event.is_terminal());
        assert!(RunEvent::Reply { reply: "ok".into() }.is_terminal());
        assert_eq!(
            RunEvent::Error { detail: "boom".into() }.data(),
            r#"{"detail":"boom"}"#
        );
    }

    #[test]
    fn channel_sink_survives_closed_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        tx.emit(RunEvent::Reply { reply: "x".into() });
    }
}
