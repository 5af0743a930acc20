//! The opsclaw agent loop.
//!
//! One run turns an operator instruction into a sequence of model rounds:
//!
//! 1. **Ask** the model with the whole conversation so far
//! 2. **Decode** exactly one action from its free-form reply ([`parser`])
//! 3. **Guard** commands before they reach a host ([`opsclaw_security`])
//! 4. **Dispatch** to the asset executor and wrap the output ([`codec`])
//! 5. **Feed back** the result as the next user message, and loop
//!
//! The run ends on a `final` action (post-processed by [`report`]), on
//! cancellation, or when the round budget runs out.

pub mod codec;
pub mod loop_runner;
pub mod parser;
pub mod prompt;
pub mod report;
pub mod session;
pub mod stream_event;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transcript;

pub use codec::ToolResultCodec;
pub use loop_runner::{AgentLoop, RunOutcome, RunRequest, RunStatus};
pub use parser::{ActionParser, ParseStrategy, parse_action};
pub use stream_event::{NoProgress, ProgressSink, RunEvent};
