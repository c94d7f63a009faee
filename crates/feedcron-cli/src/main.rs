//! feedcron - scheduled multi-step feed generation

mod app;
mod commands;
mod generator;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{due, reconcile, run, status};

#[derive(Parser)]
#[command(name = "feedcron", version, about = "Per-tenant feed generation scheduler")]
struct Cli {
    /// Config file (defaults to $FEEDCRON_CONFIG, then ~/.feedcron/feedcron.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring every tenant's process in line with its configuration
    Reconcile(reconcile::ReconcileArgs),
    /// Print the next due process as JSON
    Due,
    /// List processes and cron health
    Status,
    /// Run the polling engine until interrupted
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedcron=info,feedcron_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > FEEDCRON_CONFIG env > ~/.feedcron/feedcron.toml
    let config_path = cli.config.or_else(|| std::env::var("FEEDCRON_CONFIG").ok());
    let config = feedcron_core::FeedcronConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        feedcron_core::FeedcronConfig::default()
    });

    match cli.command {
        Commands::Reconcile(args) => reconcile::reconcile(config, args),
        Commands::Due => due::due(config),
        Commands::Status => status::status(config),
        Commands::Run => run::run(config).await,
    }
}
