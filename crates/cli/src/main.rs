//! Conclave CLI — the main entry point.
//!
//! Commands:
//! - `run`     — Run one orchestrated session to completion
//! - `roles`   — List the role catalog
//! - `config`  — Show, validate or initialize configuration

use clap::{Parser, Subcommand};
use conclave_config::AppConfig;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "conclave",
    about = "Conclave — multi-agent LLM orchestration",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.conclave/config.toml)
    #[arg(long, global = true, env = "CONCLAVE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session: spawn the roles, run the pattern, print the verdict
    Run(commands::run::RunArgs),

    /// List the roles of a catalog
    Roles {
        /// Role catalog (TOML)
        #[arg(long)]
        roles: Option<PathBuf>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Check the configuration for errors
    Validate,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = cli
        .config
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));

    match cli.command {
        Commands::Run(args) => commands::run::run(&config_path, args).await?,
        Commands::Roles { roles } => commands::roles::run(&config_path, roles)?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(&config_path)?,
            ConfigAction::Validate => commands::config_cmd::validate(&config_path)?,
            ConfigAction::Init { force } => commands::config_cmd::init(&config_path, force)?,
        },
    }

    Ok(())
}
