//! The remote-execution capability consumed by the agent loop.

use async_trait::async_trait;

/// Runs commands on named assets.
///
/// Implementations never fail: transport problems, timeouts and non-zero
/// exits are all reported inside the returned text.
#[async_trait]
pub trait AssetExecutor: Send + Sync {
    /// Human-readable enumeration of the assets, one per line.
    async fn list_assets(&self) -> String;

    /// Run `command` on `asset` and return the combined output.
    async fn execute(&self, asset: &str, command: &str) -> String;

    /// `user@host:port` for a known asset, `None` if the name is unknown.
    fn asset_host(&self, asset: &str) -> Option<String>;
}
