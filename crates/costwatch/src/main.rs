//! costwatch - cluster cost telemetry
//!
//! Runs the collector and the calculator as two independent loops over one
//! SQLite store, with a health and metrics server alongside.

use anyhow::{Context, Result};
use clap::Parser;
use costwatch_core::{
    api::{self, AppState},
    health::{components, HealthRegistry},
    observability::{PipelineMetrics, StructuredLogger},
    source::{KubeClusterSource, KubeMetricsSource, KubeSourceConfig},
    CalculatorLoop, CalculatorLoopBuilder, Clock, CollectorLoop, CollectorLoopBuilder,
    IntervalTicker, SqliteStore, SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "costwatch", version, about = "Cluster cost telemetry pipeline")]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "COSTWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Run one collector cycle and one calculator cycle, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = Args::parse();
    let config = config::AppConfig::load(args.config.as_deref())?;
    info!(
        cluster = %config.cluster_name,
        database_url = %config.database_url,
        "Configuration loaded"
    );

    let health = HealthRegistry::new();
    health.register(components::COLLECTOR).await;
    health.register(components::CALCULATOR).await;
    health.register(components::STORE).await;

    let metrics = PipelineMetrics::new();
    let logger = StructuredLogger::new(&config.cluster_name);
    logger.log_startup(VERSION);

    let store = Arc::new(
        SqliteStore::connect(&config.database_url, config.store_timeout())
            .await
            .with_context(|| format!("failed to open store {}", config.database_url))?,
    );

    let client = KubeSourceConfig {
        kubeconfig: config.kubeconfig.clone(),
    }
    .connect()
    .await
    .context("failed to create Kubernetes client")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let pricing = config.pricing();

    let collector = CollectorLoopBuilder::new()
        .cluster_source(Arc::new(KubeClusterSource::new(
            client.clone(),
            pricing.clone(),
            config.deployment_label.clone(),
            clock.clone(),
        )))
        .metrics_source(Arc::new(KubeMetricsSource::new(client)))
        .store(store.clone())
        .clock(clock.clone())
        .interval(config.collector_interval())
        .retry(config.retry_policy())
        .metrics(metrics.clone())
        .health(health.clone())
        .logger(logger.clone())
        .build()?;

    let calculator = CalculatorLoopBuilder::new()
        .store(store.clone())
        .clock(clock)
        .pricing(pricing)
        .interval(config.calculator_interval())
        .active_pod_window(config.active_pod_window())
        .metrics(metrics.clone())
        .health(health.clone())
        .logger(logger.clone())
        .build()?;

    let result = if args.once {
        run_once(&collector, &calculator).await
    } else {
        let state = Arc::new(AppState::new(health.clone(), metrics));
        run_forever(collector, calculator, &health, &logger, config.api_port, state).await
    };

    store.close().await;
    result
}

/// One collector cycle then one calculator cycle; fails if either reported an error
async fn run_once(collector: &CollectorLoop, calculator: &CalculatorLoop) -> Result<()> {
    let collected = collector.run_cycle().await;
    let calculated = calculator.run_cycle().await;

    if let Some(e) = collected.error {
        anyhow::bail!("collector cycle failed: {e}");
    }
    if let Some(e) = calculated.error {
        anyhow::bail!("calculator cycle failed: {e}");
    }
    info!(
        snapshots = collected.snapshots_inserted,
        groups = calculated.groups_written,
        "Single run complete"
    );
    Ok(())
}

async fn run_forever(
    collector: CollectorLoop,
    calculator: CalculatorLoop,
    health: &HealthRegistry,
    logger: &StructuredLogger,
    api_port: u16,
    state: Arc<AppState>,
) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel(1);

    let collector_ticker = IntervalTicker::new(collector.config().interval);
    let calculator_ticker = IntervalTicker::new(calculator.config().interval);

    let collector_handle = tokio::spawn(collector.run(collector_ticker, shutdown_tx.subscribe()));
    let calculator_handle =
        tokio::spawn(calculator.run(calculator_ticker, shutdown_tx.subscribe()));
    let api_handle = tokio::spawn(api::serve(api_port, state, shutdown_tx.subscribe()));

    health.set_ready(true).await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    logger.log_shutdown("SIGINT received");
    health.set_ready(false).await;

    // Receivers may already be gone if a task ended early
    let _ = shutdown_tx.send(());

    let (collector_cycles, calculator_cycles) = (collector_handle.await?, calculator_handle.await?);
    match api_handle.await? {
        Ok(()) => {}
        Err(e) => error!(error = %e, "API server stopped with error"),
    }

    info!(collector_cycles, calculator_cycles, "Shutdown complete");
    Ok(())
}
