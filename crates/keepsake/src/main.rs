//! Keepsake daemon - runs scheduled memory maintenance

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use keepsake::bootstrap::build_manager;
use keepsake::config::load_config;
use keepsake::error::Result;
use keepsake::lifecycle::MaintenanceScheduler;

/// Keepsake - memory lifecycle engine for conversational agents
#[derive(Parser)]
#[command(name = "keepsake")]
#[command(about = "Keeps an agent's long-term memory healthy: decay, compaction and backfill")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the maintenance scheduler until interrupted (default command)
    #[command(name = "serve")]
    Serve,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config).await,
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,keepsake=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting Keepsake daemon");

    let config = load_config(config_path.as_deref())?;
    tracing::debug!("Config loaded: {:?}", config);

    let manager = Arc::new(build_manager(&config).await?);
    let scheduler = MaintenanceScheduler::new(manager, config.scheduler.clone()).start();

    shutdown_signal().await;
    tracing::info!("Shutdown requested, waiting for running jobs");
    scheduler.shutdown().await;

    tracing::info!("Keepsake daemon stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. A handler that fails to install is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
}
