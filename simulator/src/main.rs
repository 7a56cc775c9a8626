//! durabletx simulator
//!
//! Runs scripted scenarios, or a stream of generated transactions, against
//! a transaction manager with simulated resources.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use durabletx_coordinator::{CoordinatorConfig, StoreBackend};

mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use scenario::Scenario;

/// durabletx simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "durabletx scenario runner and load generator")]
struct Args {
    /// Scenario to run: a built-in name or a JSON file
    #[arg(short, long)]
    scenario: Option<String>,

    /// List the built-in scenarios and exit
    #[arg(long)]
    list: bool,

    /// Participants per generated transaction
    #[arg(short, long, default_value = "3")]
    participants: usize,

    /// Probability that a generated participant misbehaves
    #[arg(long, default_value = "0.05")]
    failure_rate: f64,

    /// Number of transactions to generate (0 = until stopped)
    #[arg(short, long, default_value = "0")]
    transactions: u64,

    /// Run duration in seconds (0 = infinite)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Keep transaction logs in this directory instead of in memory
    #[arg(long)]
    store_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list {
        for name in Scenario::builtin() {
            println!("{name}");
        }
        return Ok(());
    }

    let mut config = CoordinatorConfig::in_memory();
    if let Some(dir) = args.store_dir {
        config.store.backend = StoreBackend::File;
        config.store.root_dir = dir;
    }
    config.check()?;

    info!("Starting durabletx simulator");
    info!("Participants: {}", args.participants);
    info!("Failure rate: {}", args.failure_rate);

    let mut controller = SimulationController::new(
        config,
        args.participants,
        args.failure_rate,
        args.seed,
    )?;
    controller.initialize().await?;

    if let Some(scenario_name) = &args.scenario {
        info!("Running scenario: {}", scenario_name);

        let scenario = Scenario::load(scenario_name)?;
        controller.run_scenario(scenario).await?;
    } else {
        info!("Press Ctrl+C to stop");

        let count = (args.transactions > 0).then_some(args.transactions);
        let duration =
            (args.duration > 0).then(|| std::time::Duration::from_secs(args.duration));
        controller.run(count, duration).await?;
    }

    controller.shutdown().await?;

    let metrics = controller.metrics();
    info!("Simulation complete");
    info!("Total transactions: {}", metrics.total_transactions);
    info!("Committed: {}", metrics.committed);
    info!("Aborted: {}", metrics.aborted);
    info!("Heuristic: {}", metrics.heuristic);
    info!("Left for recovery: {}", metrics.unfinished);
    info!(
        "Latency avg/p50/p99: {}/{}/{}ms",
        metrics.average_latency_ms(),
        metrics.p50_latency_ms(),
        metrics.p99_latency_ms()
    );
    info!("Commit rate: {:.1}%", metrics.commit_rate() * 100.0);

    Ok(())
}
