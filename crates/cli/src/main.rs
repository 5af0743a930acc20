//! opsclaw CLI: the main entry point.
//!
//! Commands:
//! - `run`          Run one instruction against the fleet
//! - `interactive`  Chat with the agent, one session across turns
//! - `gateway`      Start the HTTP API server
//! - `assets`       List the configured assets
//! - `sessions`     Inspect or delete stored sessions
//! - `config`       Write or print the configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "opsclaw",
    about = "opsclaw: chat-driven operations agent for Linux fleets",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to $OPSCLAW_CONFIG, then ~/.opsclaw/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single instruction and print the commands and the reply
    Run {
        instruction: String,

        /// Restrict the run to these assets (repeatable)
        #[arg(short, long = "asset")]
        assets: Vec<String>,

        /// Continue a stored session
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Interactive chat; every turn continues the same session
    Interactive {
        /// Continue a stored session
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Start the HTTP gateway server
    Gateway {
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List the configured assets
    Assets,

    /// Manage stored sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List sessions, most recent first
    List,
    /// Show one session's turns
    Show { id: String },
    /// Delete a session
    Delete { id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose {
        "debug".to_string()
    } else {
        std::env::var("OPSCLAW_LOG_LEVEL").unwrap_or_else(|_| "info".into())
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_json);

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run {
            instruction,
            assets,
            session,
        } => commands::run::run(config_path, instruction, assets, session).await?,
        Commands::Interactive { session } => {
            commands::interactive::run(config_path, session).await?
        }
        Commands::Gateway { host, port } => commands::gateway::run(config_path, host, port).await?,
        Commands::Assets => commands::assets::run(config_path).await?,
        Commands::Sessions { action } => match action {
            SessionsAction::List => commands::sessions::list(config_path).await?,
            SessionsAction::Show { id } => commands::sessions::show(config_path, &id).await?,
            SessionsAction::Delete { id } => commands::sessions::delete(config_path, &id).await?,
        },
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => commands::config_cmd::init(config_path, force).await?,
            ConfigAction::Show => commands::config_cmd::show(config_path).await?,
            ConfigAction::Path => commands::config_cmd::path(config_path).await?,
        },
    }

    Ok(())
}
