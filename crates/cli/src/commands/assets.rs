//! `opsclaw assets`: the fleet as configured.

use super::{CliResult, load_config};
use opsclaw_config::AssetConfig;
use std::path::Path;

fn auth_label(asset: &AssetConfig) -> &'static str {
    match (&asset.private_key_path, &asset.password) {
        (Some(_), _) => "key",
        (None, Some(_)) => "password",
        (None, None) => "agent",
    }
}

pub async fn run(config_path: Option<&Path>) -> CliResult {
    let config = load_config(config_path)?;

    if config.assets.is_empty() {
        println!("No assets configured.");
        println!(
            "Add [[assets]] entries to {}",
            opsclaw_config::AppConfig::resolve_path(config_path).display()
        );
        return Ok(());
    }

    println!("{:<20} {:<32} {}", "NAME", "ADDRESS", "AUTH");
    for asset in &config.assets {
        println!(
            "{:<20} {:<32} {}",
            asset.name,
            asset.address(),
            auth_label(asset)
        );
    }
    println!();
    println!("{} asset(s)", config.assets.len());
    Ok(())
}
