//! `opsclaw interactive`: a REPL where every turn continues one session.

use super::{
    CliResult, build_agent, execute_turn, load_config, open_sessions, print_outcome,
    require_api_key,
};
use opsclaw_agent::session;
use opsclaw_core::CancellationToken;
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

fn is_exit(line: &str) -> bool {
    matches!(line, "exit" | "quit" | "q")
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

pub async fn run(config_path: Option<&Path>, session_id: Option<String>) -> CliResult {
    let config = load_config(config_path)?;
    require_api_key(&config, config_path)?;

    let agent = build_agent(&config)?;
    let store = open_sessions(&config).await?;
    let mut session = session::resume(store.as_ref(), session_id.as_deref()).await?;

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║         opsclaw Agent: Interactive Mode      ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Model:     {}", agent.model());
    println!("  Endpoint:  {}", config.provider.base_url);
    println!("  Assets:    {}", config.assets.len());
    println!("  Session:   {}", session.id);
    println!();
    println!("  Type an instruction and press Enter.");
    println!("  Type 'exit', 'quit' or 'q' to leave; Ctrl+C stops a running turn.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if is_exit(line) {
            break;
        }
        if line.is_empty() {
            prompt()?;
            continue;
        }

        let cancel = CancellationToken::new();
        let on_ctrl_c = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n   ⏹  Stopping after the current step...");
                on_ctrl_c.cancel();
            }
        });

        let outcome = execute_turn(&agent, store.as_ref(), &session, line, Vec::new(), &cancel).await;
        watcher.abort();
        print_outcome(&outcome);

        // Reload so the next turn sees this one's messages.
        session = session::resume(store.as_ref(), Some(session.id.as_str())).await?;
        prompt()?;
    }

    println!();
    println!("  Goodbye! 👋");
    println!("  Session {} saved.", session.id);
    println!();

    Ok(())
}
