//! The wrapped observation of one dispatched action.

use serde::{Deserialize, Serialize};

/// Textual outcome of one `ListAssets` or `ExecuteCommand` dispatch, ready to
/// be re-injected into the conversation.
///
/// Built by the agent crate's codec; `text` already carries the truncation
/// note when `truncated` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    pub truncated: bool,
    /// Length in characters of the payload before truncation.
    pub original_length: usize,
}
