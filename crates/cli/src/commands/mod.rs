pub mod assets;
pub mod config_cmd;
pub mod gateway;
pub mod interactive;
pub mod run;
pub mod sessions;

use opsclaw_agent::session::{self, SessionHandle};
use opsclaw_agent::{AgentLoop, ProgressSink, RunEvent, RunOutcome, RunRequest};
use opsclaw_config::AppConfig;
use opsclaw_core::{CancellationToken, SessionStore, short_id};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = AppConfig::load_with(path).map_err(|e| format!("Failed to load config: {e}"))?;
    Ok(config)
}

/// Fail early, with setup hints, when the provider would reject every call.
pub fn require_api_key(config: &AppConfig, config_path: Option<&Path>) -> CliResult {
    if !config.needs_api_key() {
        return Ok(());
    }
    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set the environment variable:");
    eprintln!("    export DEEPSEEK_API_KEY='sk-...'");
    eprintln!();
    eprintln!("  Or add it to your config file under [provider]:");
    eprintln!("    {}", AppConfig::resolve_path(config_path).display());
    eprintln!();
    eprintln!("  A local OpenAI-compatible server (Ollama, vLLM) needs no key:");
    eprintln!("  point provider.base_url at it instead.");
    eprintln!();
    Err("No API key found. See above for setup instructions.".into())
}

pub async fn open_sessions(
    config: &AppConfig,
) -> Result<Arc<dyn SessionStore>, Box<dyn std::error::Error>> {
    let path = config.session_db_path();
    let store = opsclaw_memory::SqliteSessionStore::new(&path.to_string_lossy()).await?;
    Ok(Arc::new(store))
}

/// Agent wired to the configured provider and the fleet over SSH.
pub fn build_agent(config: &AppConfig) -> Result<AgentLoop, Box<dyn std::error::Error>> {
    let provider = opsclaw_providers::build_from_config(config)?;
    let executor = Arc::new(opsclaw_tools::SshExecutor::new(
        config.assets.clone(),
        config.ssh.clone(),
    ));
    Ok(AgentLoop::from_config(provider, executor, config))
}

/// Prints each command as a panel once it has finished.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn emit(&self, event: RunEvent) {
        match event {
            RunEvent::CommandStart {
                asset_name, command, ..
            } => {
                println!("   ⏳ [{asset_name}] {command}");
            }
            RunEvent::Command {
                asset_name,
                command,
                asset_host,
                result,
            } => print_command_panel(&asset_name, &asset_host, &command, &result),
            _ => {}
        }
    }
}

pub fn print_command_panel(asset_name: &str, asset_host: &str, command: &str, result: &str) {
    let title = if asset_host.is_empty() {
        format!("{asset_name} $ {command}")
    } else {
        format!("{asset_name} ({asset_host}) $ {command}")
    };
    println!("┌─ {title}");
    for line in result.lines() {
        println!("│ {line}");
    }
    println!("└─");
}

/// One instruction against `session`: run, print, persist.
///
/// Storage failures are logged, not returned.
pub async fn execute_turn(
    agent: &AgentLoop,
    store: &dyn SessionStore,
    session: &SessionHandle,
    instruction: &str,
    asset_names: Vec<String>,
    cancel: &CancellationToken,
) -> RunOutcome {
    let request = RunRequest::new(short_id(), instruction)
        .with_asset_names(asset_names)
        .with_history(session.history());
    let outcome = agent.run(request, &ConsoleProgress, cancel).await;

    if let Err(e) = session::record(store, session, instruction, None, &outcome).await {
        warn!(session_id = %session.id, error = %e, "Failed to save session");
    }
    outcome
}

pub fn print_outcome(outcome: &RunOutcome) {
    println!();
    match &outcome.error {
        Some(error) => eprintln!("❌ {error}"),
        None => println!("🤖 {}", outcome.reply),
    }
    println!();
}
