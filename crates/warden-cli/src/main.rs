//! warden - incident lifecycle orchestrator
//!
//! Replays incident scenarios against in-memory adapters and inspects the
//! effective configuration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use warden_core::WardenConfig;

mod config_cmd;
mod replay;

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a scenario fixture through Intake, Resolution and the Watchdog
    Replay(replay::ReplayArgs),

    /// Print the effective configuration
    Config,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Loads the config file if one was given, then applies environment overrides.
fn load_config(path: Option<&Path>) -> Result<WardenConfig> {
    let mut config = match path {
        Some(path) => WardenConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => WardenConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("invalid environment override")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Replay(args) => replay::execute(config, args).await,
        Commands::Config => config_cmd::execute(&config),
    }
}
