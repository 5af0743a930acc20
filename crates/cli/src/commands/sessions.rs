//! `opsclaw sessions`: browse and prune stored sessions.

use super::{CliResult, load_config, open_sessions, print_command_panel};
use chrono::NaiveDateTime;
use std::path::Path;

/// `2026-10-19T08:30:01.123456` → `2026-10-19 08:30`; other input unchanged.
fn short_time(stamp: &str) -> String {
    NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| stamp.to_string())
}

pub async fn list(config_path: Option<&Path>) -> CliResult {
    let config = load_config(config_path)?;
    let store = open_sessions(&config).await?;
    let sessions = store.list().await?;

    if sessions.is_empty() {
        println!("No sessions yet.");
        return Ok(());
    }
    println!("{:<14} {:<18} {}", "ID", "UPDATED", "TITLE");
    for s in &sessions {
        println!("{:<14} {:<18} {}", s.id, short_time(&s.updated_at), s.title);
    }
    Ok(())
}

pub async fn show(config_path: Option<&Path>, id: &str) -> CliResult {
    let config = load_config(config_path)?;
    let store = open_sessions(&config).await?;
    let session = store
        .get(id)
        .await?
        .ok_or_else(|| format!("Session '{id}' not found"))?;

    println!("📋 {} ({})", session.title, session.id);
    println!(
        "   Created {}, updated {}",
        short_time(&session.created_at),
        short_time(&session.updated_at)
    );

    for (i, turn) in session.turns.iter().enumerate() {
        println!();
        match &turn.asset_select {
            Some(asset) => println!("── Turn {} [{asset}]", i + 1),
            None => println!("── Turn {}", i + 1),
        }
        println!("👤 {}", turn.user);
        for cmd in &turn.commands {
            print_command_panel(&cmd.asset_name, &cmd.asset_host, &cmd.command, &cmd.result);
        }
        println!("🤖 {}", turn.reply);
    }
    Ok(())
}

pub async fn delete(config_path: Option<&Path>, id: &str) -> CliResult {
    let config = load_config(config_path)?;
    let store = open_sessions(&config).await?;
    if !store.delete(id).await? {
        return Err(format!("Session '{id}' not found").into());
    }
    println!("🗑  Deleted session {id}");
    Ok(())
}
