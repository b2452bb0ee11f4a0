//! Calculator loop

use super::{group_pods, index_latest, price_group, CalculationReport};
use crate::clock::{Clock, SystemClock, Ticker};
use crate::error::PipelineError;
use crate::health::{components, HealthRegistry};
use crate::models::Node;
use crate::observability::{services, PipelineMetrics, StructuredLogger};
use crate::pricing::PricingConfig;
use crate::store::SnapshotStore;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

/// Configuration for the calculator loop
#[derive(Debug, Clone)]
pub struct CalculatorConfig {
    /// Time between cycles (default: 300 seconds)
    pub interval: Duration,
    /// Only price pods seen within this window of the cycle time.
    /// `None` prices every pod in the store.
    pub active_pod_window: Option<Duration>,
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            active_pod_window: None,
        }
    }
}

/// Scheduled aggregation of the latest usage into cost rows
pub struct CalculatorLoop {
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    pricing: PricingConfig,
    config: CalculatorConfig,
    metrics: PipelineMetrics,
    health: HealthRegistry,
    logger: StructuredLogger,
}

impl CalculatorLoop {
    pub fn config(&self) -> &CalculatorConfig {
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
            active_pod_window_secs = self.config.active_pod_window.map(|w| w.as_secs()),
            "Starting calculator loop"
        );
        self.health.register(components::CALCULATOR).await;

        let mut cycles = 0u64;
        loop {
            tokio::select! {
                more = ticker.tick() => {
                    if !more {
                        info!(cycles, "Calculator ticker exhausted");
                        break;
                    }
                    self.run_cycle().await;
                    cycles += 1;
                }
                _ = shutdown.recv() => {
                    info!(cycles, "Shutting down calculator loop");
                    break;
                }
            }
        }

        cycles
    }

    /// Run a single calculation cycle and record its outcome
    pub async fn run_cycle(&self) -> CalculationReport {
        let start = Instant::now();
        let mut report = CalculationReport::new(self.clock.now());

        if let Err(e) = self.calculate(&mut report).await {
            report.error = Some(e);
        }
        report.elapsed = start.elapsed();

        self.record(&report).await;
        report
    }

    async fn calculate(&self, report: &mut CalculationReport) -> Result<(), PipelineError> {
        let seen_since = self
            .config
            .active_pod_window
            .and_then(|w| chrono::Duration::from_std(w).ok())
            .and_then(|w| report.computed_at.checked_sub_signed(w));

        let pods = self
            .store
            .list_pods(seen_since)
            .await
            .map_err(PipelineError::StoreWriteFailed)?;
        let nodes: HashMap<String, Node> = self
            .store
            .list_nodes()
            .await
            .map_err(PipelineError::StoreWriteFailed)?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();
        let latest = index_latest(
            self.store
                .latest_snapshots()
                .await
                .map_err(PipelineError::StoreWriteFailed)?,
        );

        report.pods_considered = pods.len();
        report.pods_without_usage = pods.iter().filter(|p| !latest.contains_key(&p.id)).count();

        for group in group_pods(&pods, &latest, &nodes) {
            let rates = self.pricing.rates_for(&group.namespace);
            match price_group(&group, &rates, report.computed_at) {
                Ok(calculation) => {
                    self.store
                        .upsert_cost_calculation(&calculation)
                        .await
                        .map_err(PipelineError::StoreWriteFailed)?;
                    report.groups_written += 1;
                    self.logger.log_cost(&calculation);
                }
                Err(e) => {
                    self.metrics.inc_groups_skipped();
                    self.metrics.inc_error(&e);
                    self.logger.log_group_skipped(&e);
                    report.groups_skipped += 1;
                    report.skipped.push(e);
                }
            }
        }

        debug!(
            groups = report.groups_written,
            skipped = report.groups_skipped,
            "Cost groups processed"
        );
        Ok(())
    }

    async fn record(&self, report: &CalculationReport) {
        self.metrics
            .observe_calculator_cycle(report.elapsed.as_secs_f64());
        self.metrics
            .inc_cycle(services::CALCULATOR, report.outcome());
        self.metrics
            .set_groups_calculated(report.groups_written as i64);

        match &report.error {
            Some(e) => {
                self.metrics.inc_error(e);
                self.health.record_cycle(components::CALCULATOR, Some(e)).await;
                self.health
                    .set_unhealthy(components::STORE, e.to_string())
                    .await;
            }
            None => {
                // Skipped groups degrade the calculator without failing it
                self.health
                    .record_cycle(components::CALCULATOR, report.skipped.first())
                    .await;
                self.health.record_cycle(components::STORE, None).await;
            }
        }

        self.logger.log_calculation(report);
    }
}

/// Builder for the calculator loop
pub struct CalculatorLoopBuilder {
    store: Option<Arc<dyn SnapshotStore>>,
    clock: Arc<dyn Clock>,
    pricing: PricingConfig,
    config: CalculatorConfig,
    metrics: Option<PipelineMetrics>,
    health: HealthRegistry,
    logger: StructuredLogger,
}

impl CalculatorLoopBuilder {
    /// Create a new builder with default rates and the system clock
    pub fn new() -> Self {
        Self {
            store: None,
            clock: Arc::new(SystemClock),
            pricing: PricingConfig::default(),
            config: CalculatorConfig::default(),
            metrics: None,
            health: HealthRegistry::new(),
            logger: StructuredLogger::new("default"),
        }
    }

    pub fn store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn pricing(mut self, pricing: PricingConfig) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn active_pod_window(mut self, window: Option<Duration>) -> Self {
        self.config.active_pod_window = window;
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

    pub fn build(self) -> Result<CalculatorLoop> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Store is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Calculator interval must be non-zero");
        }
        self.pricing
            .validate()
            .map_err(|reason| anyhow::anyhow!("Invalid pricing: {reason}"))?;

        Ok(CalculatorLoop {
            store,
            clock: self.clock,
            pricing: self.pricing,
            config: self.config,
            metrics: self.metrics.unwrap_or_default(),
            health: self.health,
            logger: self.logger,
        })
    }
}

impl Default for CalculatorLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
