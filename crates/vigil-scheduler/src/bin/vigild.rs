use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use vigil_core::{GraphAgent, Orchestrator, SystemClock};
use vigil_graph::{InMemoryGraph, InMemoryRegistry};
use vigil_scheduler::{EscalationSweeper, SweeperConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let data_dir = std::env::var("VIGIL_DATA").unwrap_or_else(|_| "data".to_string());
    let config = match std::env::var("VIGIL_CONFIG") {
        Ok(path) => SweeperConfig::load(Path::new(&path))?,
        Err(_) => SweeperConfig::default(),
    };

    let clock = Arc::new(SystemClock);
    let orchestrator = Arc::new(Orchestrator::open(
        Path::new(&data_dir),
        config.policy.clone(),
        clock.clone(),
        Arc::new(GraphAgent),
        Arc::new(InMemoryGraph::new()),
        Arc::new(InMemoryRegistry::new()),
    )?);
    let sweeper = EscalationSweeper::new(
        orchestrator.incidents().clone(),
        orchestrator.bus().publisher(),
        clock,
        config.interval_secs,
    );

    tracing::info!(%data_dir, interval_secs = config.interval_secs, "vigild starting");

    let shutdown = CancellationToken::new();
    let dispatch = {
        let orchestrator = orchestrator.clone();
        let token = shutdown.clone();
        tokio::spawn(async move { orchestrator.run(token).await })
    };
    let sweep = {
        let token = shutdown.clone();
        tokio::spawn(async move { sweeper.run(token).await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    shutdown.cancel();
    let _ = tokio::join!(dispatch, sweep);
    Ok(())
}
