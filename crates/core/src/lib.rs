//! # opsclaw core
//!
//! Domain types, traits, and error definitions shared by every opsclaw crate.
//! Nothing here performs I/O; the provider, executor and session store are
//! traits implemented in their own crates.
//!
//! ## Layout
//!
//! - [`message`]: conversation messages exchanged with the model
//! - [`action`]: the canonical action decoded from one assistant reply
//! - [`tool_result`]: wrapped observation fed back to the model
//! - [`run`]: live progress of one agent run (`RunState`)
//! - [`session`]: persisted turns and the `SessionStore` trait
//! - [`provider`], [`executor`]: the two capabilities the agent loop consumes

pub mod action;
pub mod cancel;
pub mod error;
pub mod executor;
pub mod ids;
pub mod message;
pub mod provider;
pub mod run;
pub mod session;
pub mod tool_result;

// Re-export key types at crate root for ergonomics
pub use action::Action;
pub use cancel::CancellationToken;
pub use error::{Error, ProviderError, RegistryError, Result, SessionError};
pub use executor::AssetExecutor;
pub use ids::short_id;
pub use message::{Conversation, Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use run::{CommandRecord, ModelReply, RunState};
pub use session::{SessionRecord, SessionStore, SessionSummary, Turn};
pub use tool_result::ToolResult;
