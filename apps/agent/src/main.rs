//! # meshstage-agent
//!
//! Command-line entry point for the reconciliation engine.
//!
//! ## Commands
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        meshstage-agent                                  │
//! │                                                                         │
//! │  sweep           one resolve → accept → converge → prune pass          │
//! │  run             sweep every interval until SIGINT / SIGTERM           │
//! │  prune           stale membership pruning only                         │
//! │  registry        rebuild and print the stage registry                  │
//! │  event <FILE|->  handle one tag-change notification (JSON)             │
//! │                                                                         │
//! │  Reports are printed to stdout as JSON; logs go to stderr.             │
//! │  Exit status is 1 when the report status is FAILED.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use meshstage_core::OutcomeStatus;
use meshstage_engine::{EngineConfig, Reconciler};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "meshstage-agent", version, about = "Stage membership reconciliation agent")]
struct Cli {
    /// Path to meshstage.toml (defaults to the platform config directory).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a single sweep.
    Sweep,
    /// Sweep periodically until interrupted.
    Run,
    /// Prune stale memberships.
    Prune,
    /// Rebuild and print the stage registry.
    Registry,
    /// Handle one tag-change notification read from FILE, or stdin for `-`.
    Event {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(status) if status.is_failure() => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "meshstage-agent failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<OutcomeStatus> {
    let config = EngineConfig::load(cli.config).context("failed to load configuration")?;
    info!(role = %config.role, "Configuration loaded");

    let reconciler = Reconciler::connect(config)
        .await
        .context("failed to initialise reconciler")?;

    match cli.command {
        Command::Sweep => {
            let report = reconciler.sweep().await;
            print_json(&report)?;
            Ok(report.status)
        }
        Command::Run => {
            reconciler.run_periodic(shutdown_signal()).await;
            info!("Agent stopped");
            Ok(OutcomeStatus::Succeeded)
        }
        Command::Prune => {
            let outcome = reconciler.prune().await;
            print_json(&outcome)?;
            Ok(outcome.status)
        }
        Command::Registry => {
            let resolution = reconciler.resolve_registry().await?;
            print_json(&resolution)?;
            Ok(OutcomeStatus::Succeeded)
        }
        Command::Event { input } => {
            let raw = read_input(&input)?;
            let notification: serde_json::Value =
                serde_json::from_str(&raw).context("notification is not valid JSON")?;
            let outcome = reconciler.handle_notification(&notification).await;
            print_json(&outcome)?;
            Ok(outcome.status)
        }
    }
}

/// Initializes the tracing subscriber.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=meshstage_engine=trace` - Trace the engine only
/// - Default: INFO, with engine DEBUG
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,meshstage_engine=debug,sqlx=warn"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn read_input(input: &Path) -> Result<String> {
    if input.as_os_str() == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("failed to read notification from stdin")?;
        Ok(raw)
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("failed to read notification from {}", input.display()))
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, finishing current sweep");
}
