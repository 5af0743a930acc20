//! `opsclaw run`: one instruction, printed as it happens.

use super::{
    CliResult, build_agent, execute_turn, load_config, open_sessions, print_outcome,
    require_api_key,
};
use opsclaw_agent::RunStatus;
use opsclaw_agent::session;
use opsclaw_core::CancellationToken;
use std::path::Path;
use tracing::info;

pub async fn run(
    config_path: Option<&Path>,
    instruction: String,
    assets: Vec<String>,
    session_id: Option<String>,
) -> CliResult {
    let config = load_config(config_path)?;
    require_api_key(&config, config_path)?;

    let instruction = instruction.trim();
    if instruction.is_empty() {
        return Err("instruction must not be empty".into());
    }
    for name in &assets {
        if config.asset(name).is_none() {
            return Err(format!("Unknown asset '{name}' (see `opsclaw assets`)").into());
        }
    }

    let agent = build_agent(&config)?;
    let store = open_sessions(&config).await?;
    let session = session::resume(store.as_ref(), session_id.as_deref()).await?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n   ⏹  Stopping after the current step...");
            info!("Ctrl-C received, cancelling run");
            on_ctrl_c.cancel();
        }
    });

    println!("🦀 opsclaw ({})", agent.model());
    println!("   Session: {}", session.id);
    println!();

    let outcome = execute_turn(&agent, store.as_ref(), &session, instruction, assets, &cancel).await;
    watcher.abort();

    print_outcome(&outcome);
    println!("   Continue with: opsclaw run --session {} \"...\"", session.id);

    if outcome.status == RunStatus::Failed {
        return Err("run did not complete".into());
    }
    Ok(())
}
