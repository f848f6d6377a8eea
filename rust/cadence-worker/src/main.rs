//! cadence-worker - Main Entry Point
//!
//! Runs recurring task, expense and reminder jobs until shut down.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;

use cadence_engine::SystemClock;
use cadence_worker::config::WorkerConfig;
use cadence_worker::logging::init_tracing;
use cadence_worker::{log_init_step, runtime, Worker};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "cadence-worker")]
#[command(about = "Recurrence scheduling worker for tasks, expenses and reminders")]
#[command(version)]
struct Args {
    /// Config file path.
    #[arg(short, long, env = "CADENCE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level, overriding the configured one.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker until Ctrl+C or SIGTERM.
    Run,
    /// Print upcoming occurrences for a recurrence descriptor.
    Preview {
        /// JSON file holding the descriptor.
        #[arg(long)]
        descriptor: PathBuf,
        /// Number of occurrences to print.
        #[arg(long, default_value_t = 5)]
        count: usize,
        /// Reference time (RFC 3339), defaults to now.
        #[arg(long)]
        from: Option<DateTime<Utc>>,
    },
    /// Load and validate configuration, then print it.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run => run(args.config, args.log_level).await,
        Command::Preview {
            descriptor,
            count,
            from,
        } => {
            let descriptor = runtime::load_descriptor(&descriptor).await?;
            for occurrence in runtime::preview(&descriptor, from.unwrap_or_else(Utc::now), count)? {
                println!("{}", occurrence.to_rfc3339());
            }
            Ok(())
        }
        Command::CheckConfig => {
            let config = WorkerConfig::load(args.config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run(config_path: Option<PathBuf>, log_level: Option<String>) -> anyhow::Result<()> {
    let mut config = WorkerConfig::load(config_path.as_deref())?;
    if let Some(level) = log_level {
        config.logging.level = level;
    }
    init_tracing(&config.logging).context("failed to initialise logging")?;

    tracing::info!("Starting cadence-worker v{}", env!("CARGO_PKG_VERSION"));
    log_init_step!(1, 3, "Configuration loaded", config.storage.data_dir.display());

    let worker = Worker::build(&config, Arc::new(SystemClock)).await?;
    log_init_step!(2, 3, "Storage opened");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    log_init_step!(3, 3, "Runner starting");
    worker.run(shutdown).await?;

    tracing::info!("Worker shut down gracefully");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}
