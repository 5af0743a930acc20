//! `opsclaw config`: configuration file commands.

use super::{CliResult, load_config};
use opsclaw_config::AppConfig;
use std::path::Path;

pub async fn init(config_path: Option<&Path>, force: bool) -> CliResult {
    let path = AppConfig::resolve_path(config_path);
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;

    println!("✅ Wrote {}", path.display());
    println!("   Edit [[assets]] to describe your fleet, then set DEEPSEEK_API_KEY.");
    Ok(())
}

pub async fn show(config_path: Option<&Path>) -> CliResult {
    let mut config = load_config(config_path)?;
    if config.provider.api_key.is_some() {
        config.provider.api_key = Some("***".into());
    }
    for asset in &mut config.assets {
        if asset.password.is_some() {
            asset.password = Some("***".into());
        }
    }
    if config.gateway.api_token.is_some() {
        config.gateway.api_token = Some("***".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path(config_path: Option<&Path>) -> CliResult {
    println!("{}", AppConfig::resolve_path(config_path).display());
    Ok(())
}
