use std::sync::Arc;

use anyhow::{Context, Result};
use feedcron_core::FeedcronConfig;
use feedcron_scheduler::{EngineSettings, SchedulerEngine};
use tracing::info;

use crate::app::App;
use crate::generator::CommandGenerator;

pub async fn run(config: FeedcronConfig) -> Result<()> {
    let generator = CommandGenerator::from_config(&config.generator)
        .context("generator.command must be set to run the engine")?;
    let settings = EngineSettings::from_config(&config.scheduler);
    let app = App::build(config, None)?;

    let engine = SchedulerEngine::new(
        app.reconciler.clone(),
        app.lifecycle.clone(),
        Arc::new(generator),
        app.store.clone(),
        settings,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(engine.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, stopping");
    let _ = shutdown_tx.send(true);
    handle.await?;
    Ok(())
}
