//! The canonical action decoded from one assistant message.

use serde::{Deserialize, Serialize};

/// What the model asked the loop to do next.
///
/// Serializes to the same JSON shape the model is told to emit, so a
/// decoded action can be logged or echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Enumerate the configured assets.
    ListAssets,

    /// Run one shell command on one asset.
    ExecuteCommand { asset: String, command: String },

    /// Conclude the run with a message for the operator.
    Final { message: String },

    /// A well-formed action object whose `action` value is not one of the above.
    Unrecognized { raw: String },
}

impl Action {
    /// The wire name of this action.
    pub fn kind(&self) -> &str {
        match self {
            Self::ListAssets => "list_assets",
            Self::ExecuteCommand { .. } => "execute_command",
            Self::Final { .. } => "final",
            Self::Unrecognized { raw } => raw,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_command_wire_shape() {
        let action = Action::ExecuteCommand {
            asset: "web-01".into(),
            command: "df -h".into(),
        };
        let json = serde_json::to_string(&action).unwrap();
        assert_eq!(
            json,
            r#"{"action":"execute_command","asset":"web-01","command":"df -h"}"#
        );
    }

    #[test]
    fn kind_names() {
        assert_eq!(Action::ListAssets.kind(), "list_assets");
        assert_eq!(Action::Final { message: "ok".into() }.kind(), "final");
        assert_eq!(Action::Unrecognized { raw: "reboot_all".into() }.kind(), "reboot_all");
        assert!(Action::Final { message: String::new() }.is_final());
    }
}
