//! Remote execution for opsclaw.
//!
//! The agent loop reaches managed hosts only through
//! [`opsclaw_core::AssetExecutor`]; [`SshExecutor`] is the production
//! implementation, shelling out to the system OpenSSH client.

pub mod ssh;

pub use ssh::{SshExecutor, command_timeout};
