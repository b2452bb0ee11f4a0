//! Collector loop
//!
//! Runs one collection cycle per tick until the ticker is exhausted or a
//! shutdown signal arrives. A failed cycle is recorded and the loop simply
//! waits for the next tick.

use super::{resolve_usage, CollectionReport};
use crate::clock::{Clock, SystemClock, Ticker};
use crate::error::PipelineError;
use crate::health::{components, HealthRegistry};
use crate::observability::{services, PipelineMetrics, StructuredLogger};
use crate::retry::RetryPolicy;
use crate::source::{ClusterSource, MetricsSource};
use crate::store::SnapshotStore;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::info;

/// Configuration for the collector loop
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Time between cycles (default: 300 seconds)
    pub interval: Duration,
    /// Retry policy for control-plane and metrics fetches
    pub retry: RetryPolicy,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

/// Scheduled collection of inventory and usage into the store
pub struct CollectorLoop {
    cluster: Arc<dyn ClusterSource>,
    usage: Arc<dyn MetricsSource>,
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    config: CollectorConfig,
    metrics: PipelineMetrics,
    health: HealthRegistry,
    logger: StructuredLogger,
}

impl CollectorLoop {
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Run cycles on every tick until the ticker stops or shutdown is signalled.
    /// Returns the number of cycles run.
    pub async fn run<T: Ticker>(
        self,
        mut ticker: T,
        mut shutdown: broadcast::Receiver<()>,
    ) -> u64 {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting collector loop"
        );
        self.health.register(components::COLLECTOR).await;

        let mut cycles = 0u64;
        loop {
            tokio::select! {
                more = ticker.tick() => {
                    if !more {
                        info!(cycles, "Collector ticker exhausted");
                        break;
                    }
                    self.run_cycle().await;
                    cycles += 1;
                }
                _ = shutdown.recv() => {
                    info!(cycles, "Shutting down collector loop");
                    break;
                }
            }
        }

        cycles
    }

    /// Run a single collection cycle and record its outcome
    pub async fn run_cycle(&self) -> CollectionReport {
        let start = Instant::now();
        let mut report = CollectionReport::new(self.clock.now());

        if let Err(e) = self.collect(&mut report).await {
            report.error = Some(e);
        }
        report.elapsed = start.elapsed();

        self.record(&report).await;
        report
    }

    async fn collect(&self, report: &mut CollectionReport) -> Result<(), PipelineError> {
        let inventory = self
            .config
            .retry
            .run("fetch_inventory", || self.cluster.fetch_inventory())
            .await
            .map_err(|e| PipelineError::SourceUnavailable(e.to_string()))?;

        self.store
            .upsert_nodes(&inventory.nodes)
            .await
            .map_err(PipelineError::StoreWriteFailed)?;
        report.nodes_upserted = inventory.nodes.len();

        self.store
            .upsert_pods(&inventory.pods)
            .await
            .map_err(PipelineError::StoreWriteFailed)?;
        report.pods_upserted = inventory.pods.len();

        self.metrics
            .set_inventory(inventory.nodes.len() as i64, inventory.pods.len() as i64);

        let usage = self
            .config
            .retry
            .run("fetch_usage", || self.usage.fetch_usage())
            .await
            .map_err(|e| PipelineError::MetricsUnavailable(e.to_string()))?;
        if usage.is_empty() {
            return Err(PipelineError::MetricsUnavailable(
                "metrics source returned no samples".to_string(),
            ));
        }
        report.usage_samples = usage.len();

        let (snapshots, unmatched) = resolve_usage(&inventory.pods, &usage, self.clock.now());
        report.unmatched_usage = unmatched;

        if !snapshots.is_empty() {
            report.snapshots_inserted = self
                .store
                .insert_snapshots(&snapshots)
                .await
                .map_err(PipelineError::StoreWriteFailed)?;
        }

        Ok(())
    }

    async fn record(&self, report: &CollectionReport) {
        self.metrics
            .observe_collector_cycle(report.elapsed.as_secs_f64());
        self.metrics.inc_cycle(services::COLLECTOR, report.outcome());
        self.metrics.add_snapshots_inserted(report.snapshots_inserted);
        self.metrics.add_unmatched_usage(report.unmatched_usage as u64);

        let error = report.error.as_ref();
        if let Some(e) = error {
            self.metrics.inc_error(e);
        }

        self.health.record_cycle(components::COLLECTOR, error).await;
        match error {
            Some(e @ PipelineError::StoreWriteFailed(_)) => {
                self.health
                    .set_unhealthy(components::STORE, e.to_string())
                    .await
            }
            // Store untouched this cycle
            Some(PipelineError::SourceUnavailable(_)) => {}
            _ => self.health.record_cycle(components::STORE, None).await,
        }

        self.logger.log_collection(report);
    }
}

/// Builder for the collector loop
pub struct CollectorLoopBuilder {
    cluster: Option<Arc<dyn ClusterSource>>,
    usage: Option<Arc<dyn MetricsSource>>,
    store: Option<Arc<dyn SnapshotStore>>,
    clock: Arc<dyn Clock>,
    config: CollectorConfig,
    metrics: Option<PipelineMetrics>,
    health: HealthRegistry,
    logger: StructuredLogger,
}

impl CollectorLoopBuilder {
    /// Create a new builder with default configuration and the system clock
    pub fn new() -> Self {
        Self {
            cluster: None,
            usage: None,
            store: None,
            clock: Arc::new(SystemClock),
            config: CollectorConfig::default(),
            metrics: None,
            health: HealthRegistry::new(),
            logger: StructuredLogger::new("default"),
        }
    }

    pub fn cluster_source(mut self, source: Arc<dyn ClusterSource>) -> Self {
        self.cluster = Some(source);
        self
    }

    pub fn metrics_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.usage = Some(source);
        self
    }

    pub fn store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn build(self) -> Result<CollectorLoop> {
        let cluster = self
            .cluster
            .ok_or_else(|| anyhow::anyhow!("Cluster source is required"))?;
        let usage = self
            .usage
            .ok_or_else(|| anyhow::anyhow!("Metrics source is required"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Store is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Collector interval must be non-zero");
        }

        Ok(CollectorLoop {
            cluster,
            usage,
            store,
            clock: self.clock,
            config: self.config,
            metrics: self.metrics.unwrap_or_default(),
            health: self.health,
            logger: self.logger,
        })
    }
}

impl Default for CollectorLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
