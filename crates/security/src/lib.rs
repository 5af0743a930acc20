//! Safety guard for opsclaw: the checks every model-proposed action passes
//! before it reaches a real host, and every final answer passes before it
//! reaches the operator.
//!
//! Provides:
//! - **Command checks**: destructive-pattern blocklist, template placeholders,
//!   missing fields ([`command`])
//! - **Reply checks**: low-quality final messages, natural-language summaries,
//!   and the two stall detectors that drive self-correction ([`reply`])

pub mod command;
pub mod reply;

pub use command::{is_dangerous_command, is_placeholder, GuardVerdict, Rejection, SafetyGuard};
pub use reply::{
    is_fluff, looks_like_asset_reselection, looks_like_final_summary,
    looks_like_intent_without_dispatch,
};
