//! devhost CLI - Main entry point

mod cli;

use anyhow::Context;
use clap::{Parser, Subcommand};
use devhost_foundation::{EnvFile, SupervisorConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// devhost - start and supervise the agent web UI dev server
#[derive(Parser, Debug)]
#[command(name = "devhost")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file to use instead of the global/project files
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// UI checkout directory (skips candidate resolution)
    #[arg(long)]
    ui_dir: Option<PathBuf>,

    /// Port the UI is served on
    #[arg(long)]
    ui_port: Option<u16>,

    /// Port of the agent backend
    #[arg(long)]
    backend_port: Option<u16>,

    /// Extra environment for the UI process, in .env format
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the UI and supervise it until it exits or a signal arrives
    Start,
    /// Check prerequisites and ports without starting anything
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = load_config(&args)?;

    match args.command.unwrap_or(Command::Start) {
        Command::Check => cli::run_check(&config).await,
        Command::Start => {
            let overlay = match &args.env_file {
                Some(path) => EnvFile::load(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?
                    .to_overlay(),
                None => Default::default(),
            };
            cli::run_start(config, overlay).await
        }
    }
}

/// Config files first, then command line overrides
fn load_config(args: &Args) -> anyhow::Result<SupervisorConfig> {
    let mut config = match &args.config {
        Some(path) => SupervisorConfig::load_from(path)?,
        None => SupervisorConfig::load()?,
    };

    if let Some(dir) = &args.ui_dir {
        config.set_checkout_dir(dir.clone());
    }
    if let Some(port) = args.ui_port {
        config.set_ui_port(port);
    }
    if let Some(port) = args.backend_port {
        config.backend_port = port;
    }

    config.validate()?;
    Ok(config)
}
