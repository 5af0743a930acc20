//! `opsclaw gateway`: start the HTTP API server.

use super::{CliResult, load_config, require_api_key};
use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    host_override: Option<String>,
    port_override: Option<u16>,
) -> CliResult {
    let mut config = load_config(config_path)?;
    require_api_key(&config, config_path)?;

    if let Some(host) = host_override {
        config.gateway.host = host;
    }
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("🦀 opsclaw Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.provider.model);
    println!("   Assets:    {}", config.assets.len());
    println!(
        "   Auth:      {}",
        if config.gateway.api_token.is_some() {
            "bearer token"
        } else {
            "none"
        }
    );

    opsclaw_gateway::start(config).await?;

    Ok(())
}
