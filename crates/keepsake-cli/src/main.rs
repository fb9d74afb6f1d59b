use std::path::PathBuf;

use clap::{Parser, Subcommand};
use keepsake::bootstrap::build_manager;
use keepsake::config::{EmbeddingProviderKind, load_config};
use keepsake_cli::commands::{
    CompactCommand, ConfigCommand, DecayCommand, ExtractCommand, MemoryCommand, RecallCommand,
    StatsCommand,
};
use keepsake_cli::error::CliResult;
use keepsake_cli::output::OutputFormat;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "keepsake-cli")]
#[command(about = "Keepsake CLI - Management tool for keepsake memories")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to data directory")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(
        long,
        short = 'u',
        global = true,
        default_value = "default",
        help = "Owner whose memories to manage"
    )]
    pub owner: String,

    #[clap(
        long,
        global = true,
        help = "Skip the embedding model; recall falls back to text matching"
    )]
    pub offline: bool,

    #[clap(long, short, global = true, help = "Log lifecycle activity to stderr")]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Memory management commands")]
    Memory(MemoryCommand),

    #[clap(about = "Extract memories from a message")]
    Extract(ExtractCommand),

    #[clap(about = "Recall memories relevant to a query")]
    Recall(RecallCommand),

    #[clap(about = "Show memory statistics for the owner")]
    Stats(StatsCommand),

    #[clap(about = "Run one decay pass")]
    Decay(DecayCommand),

    #[clap(about = "Trigger memory compaction")]
    Compact(CompactCommand),

    #[clap(about = "Configuration commands")]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    if cli.verbose {
        init_logging();
    }

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(ref data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if cli.offline {
        config.embedding.provider = EmbeddingProviderKind::None;
    }

    if let Command::Config(cmd) = &cli.command {
        return cmd.execute(&config, cli.config.as_deref(), format);
    }

    tracing::debug!(
        "Opening store at {} for owner {}",
        config.storage.data_dir.display(),
        cli.owner
    );
    let manager = build_manager(&config).await?;
    let owner = cli.owner.as_str();

    match &cli.command {
        Command::Memory(cmd) => cmd.execute(&manager, owner, format).await,
        Command::Extract(cmd) => cmd.execute(&manager, owner, format).await,
        Command::Recall(cmd) => cmd.execute(&manager, owner, format).await,
        Command::Stats(cmd) => cmd.execute(&manager, owner, format).await,
        Command::Decay(cmd) => cmd.execute(&manager, format).await,
        Command::Compact(cmd) => cmd.execute(&manager, owner, format).await,
        Command::Config(cmd) => cmd.execute(&config, cli.config.as_deref(), format),
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,keepsake=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
