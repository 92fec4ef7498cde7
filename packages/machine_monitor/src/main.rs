use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;

mod cli;
mod config;

use crate::config::{MonitorConfig, MonitorPaths};

#[derive(Parser, Debug)]
#[command(name = "machine-monitor")]
#[command(about = "Watch connection status and live logs of remote workflow machines")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to <config dir>/machine-monitor/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open the status dashboard for every configured machine (default)
    Watch,
    /// Stream one machine's log lines to stdout
    Tail(TailArgs),
    /// List configured machines and their event URLs
    List(ListArgs),
}

#[derive(Args, Debug)]
struct TailArgs {
    /// Machine id or display name
    machine: String,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = MonitorPaths::new(cli.config.clone())?;
    let dashboard = matches!(cli.command, None | Some(Commands::Watch));

    init_tracing(&paths, cli.debug, dashboard)?;

    let config = MonitorConfig::load(&paths.config_path)?;
    info!(
        config = %paths.config_path.display(),
        machines = config.machines.len(),
        "Loaded configuration"
    );

    match cli.command {
        None | Some(Commands::Watch) => cli::watch_command(config).await,
        Some(Commands::Tail(args)) => cli::tail_command(config, &args.machine).await,
        Some(Commands::List(args)) => cli::list_command(&config, args.json),
    }
}

/// The dashboard owns the terminal, so its tracing output goes to a file in
/// the state directory. Everything else logs to stderr.
fn init_tracing(paths: &MonitorPaths, debug: bool, dashboard: bool) -> Result<()> {
    let default_directive = if debug {
        "machine_monitor=debug,machine_events=debug,info"
    } else {
        "machine_monitor=info,machine_events=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if dashboard {
        paths.ensure_state_dir()?;
        let log_path = paths.log_path();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file: {:?}", log_path))?;
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false),
            )
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    }
    Ok(())
}
