//! verilist binary: mirrors verification records into announcement posts and
//! membership lists.
//!
//! Structured logging, database initialization, and graceful shutdown on
//! SIGTERM/SIGINT.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use verilist_bot::config::{self, Config};
use verilist_bot::runtime::{self, StartupError};
use verilist_engine::{Shutdown, ShutdownTrigger};

#[derive(Parser)]
#[command(name = "verilist")]
#[command(about = "Idempotent fan-out of verification records into posts and lists")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, env = "VERILIST_CONFIG_PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the live stream and fan out new verifications
    Watch,
    /// Walk verifier histories and perform every missing effect
    Backfill {
        /// Only this verifier (repeatable; default: every configured verifier)
        #[arg(long = "verifier")]
        verifiers: Vec<String>,
        /// Also post announcements for backfilled verifications
        #[arg(long)]
        announce: bool,
    },
    /// Apply database migrations and exit
    Migrate,
    /// Print the stored checkpoint and ledger counts
    Status,
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref().unwrap_or("config.toml");

    let config = match config::load_config(Some(config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration from {config_path}: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config);
    tracing::info!(path = config_path, "resolved startup configuration path");

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "verilist stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: Config) -> Result<(), StartupError> {
    let pool = runtime::open_database(&config.database)?;

    match command {
        Commands::Migrate => {
            tracing::info!(path = %config.database.path, "database is up to date");
        }
        Commands::Status => {
            let (checkpoint, counts) = runtime::read_status(pool).await?;
            println!(
                "{}",
                serde_json::json!({
                    "checkpoint": checkpoint,
                    "effects": counts.effects,
                    "verifications": counts.verifications,
                })
            );
        }
        Commands::Watch => {
            let (trigger, shutdown) = Shutdown::channel();
            tokio::spawn(shutdown_signal(trigger));
            let summary = runtime::watch(&config, pool, shutdown).await?;
            tracing::info!(
                events = summary.events,
                performed = summary.performed,
                checkpoint = ?summary.last_checkpoint,
                "verilist shut down"
            );
        }
        Commands::Backfill {
            verifiers,
            announce,
        } => {
            let (trigger, shutdown) = Shutdown::channel();
            tokio::spawn(shutdown_signal(trigger));
            let announce = announce || config.backfill.announce;
            let reports = runtime::backfill(&config, pool, verifiers, announce, shutdown).await?;
            for report in &reports {
                println!(
                    "{}: pages={} processed={} performed={} already_done={} failed={}{}",
                    report.verifier_id,
                    report.pages,
                    report.processed,
                    report.performed,
                    report.already_done,
                    report.failed,
                    if report.interrupted { " (interrupted)" } else { "" },
                );
            }
        }
    }
    Ok(())
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal, then fires `trigger`.
async fn shutdown_signal(trigger: ShutdownTrigger) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
    trigger.trigger();
}
