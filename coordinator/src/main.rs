//! durabletx coordinator daemon
//!
//! Opens the configured object store, runs the recovery manager over it and
//! reports transactions left with heuristic outcomes.

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use durabletx_coordinator::{CoordinatorConfig, TransactionManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CoordinatorConfig::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting durabletx coordinator");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let manager = TransactionManager::new(config.clone())?;
    info!(
        node_id = %manager.node_id(),
        store = %manager.store().name(),
        root_dir = %config.store.root_dir.display(),
        "Node ID assigned"
    );

    manager.start().await?;

    let report = manager.recovery().scan_once().await?;
    info!(
        recovered = report.recovered,
        pending = report.pending,
        heuristic = report.heuristic,
        "Initial recovery pass finished"
    );

    for heuristic in manager.heuristics().list()? {
        warn!(
            tx = %heuristic.uid,
            status = %heuristic.status,
            report = %serde_json::to_string(&heuristic)?,
            "Transaction has unresolved heuristic outcomes"
        );
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    manager.stop().await?;
    info!(metrics = ?manager.metrics().snapshot(), "Coordinator shutdown complete");
    Ok(())
}
