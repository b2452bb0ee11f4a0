//! Observability infrastructure for the cost pipeline
//!
//! Provides:
//! - Prometheus metrics (cycle latency, cycle outcomes, error kinds, inventory size)
//! - Structured JSON logging with tracing

use crate::calculator::CalculationReport;
use crate::collector::CollectionReport;
use crate::error::PipelineError;
use crate::models::CostCalculation;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for cycle durations (in seconds)
const CYCLE_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Service label values
pub mod services {
    pub const COLLECTOR: &str = "collector";
    pub const CALCULATOR: &str = "calculator";
}

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

struct PipelineMetricsInner {
    collector_cycle_seconds: Histogram,
    calculator_cycle_seconds: Histogram,
    cycles_total: IntCounterVec,
    errors_total: IntCounterVec,
    snapshots_inserted: IntCounter,
    unmatched_usage: IntCounter,
    groups_skipped: IntCounter,
    nodes_inventoried: IntGauge,
    pods_inventoried: IntGauge,
    groups_calculated: IntGauge,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            collector_cycle_seconds: register_histogram!(
                "costwatch_collector_cycle_seconds",
                "Duration of collector cycles",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register collector_cycle_seconds"),

            calculator_cycle_seconds: register_histogram!(
                "costwatch_calculator_cycle_seconds",
                "Duration of calculator cycles",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register calculator_cycle_seconds"),

            cycles_total: register_int_counter_vec!(
                "costwatch_cycles_total",
                "Completed cycles by service and outcome",
                &["service", "outcome"]
            )
            .expect("Failed to register cycles_total"),

            errors_total: register_int_counter_vec!(
                "costwatch_errors_total",
                "Pipeline errors by kind",
                &["kind"]
            )
            .expect("Failed to register errors_total"),

            snapshots_inserted: register_int_counter!(
                "costwatch_snapshots_inserted_total",
                "Usage snapshots appended to the store"
            )
            .expect("Failed to register snapshots_inserted_total"),

            unmatched_usage: register_int_counter!(
                "costwatch_unmatched_usage_total",
                "Usage samples dropped because their pod was not in the inventory"
            )
            .expect("Failed to register unmatched_usage_total"),

            groups_skipped: register_int_counter!(
                "costwatch_groups_skipped_total",
                "Workload groups skipped because of invalid rate inputs"
            )
            .expect("Failed to register groups_skipped_total"),

            nodes_inventoried: register_int_gauge!(
                "costwatch_nodes_inventoried",
                "Nodes upserted by the last successful collector cycle"
            )
            .expect("Failed to register nodes_inventoried"),

            pods_inventoried: register_int_gauge!(
                "costwatch_pods_inventoried",
                "Pods upserted by the last successful collector cycle"
            )
            .expect("Failed to register pods_inventoried"),

            groups_calculated: register_int_gauge!(
                "costwatch_groups_calculated",
                "Cost rows written by the last calculator cycle"
            )
            .expect("Failed to register groups_calculated"),
        }
    }
}

/// Pipeline metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new)
    }

    pub fn observe_collector_cycle(&self, duration_secs: f64) {
        self.inner().collector_cycle_seconds.observe(duration_secs);
    }

    pub fn observe_calculator_cycle(&self, duration_secs: f64) {
        self.inner().calculator_cycle_seconds.observe(duration_secs);
    }

    /// Count a finished cycle; outcome is `ok`, `partial` or `failed`
    pub fn inc_cycle(&self, service: &str, outcome: &str) {
        self.inner()
            .cycles_total
            .with_label_values(&[service, outcome])
            .inc();
    }

    pub fn inc_error(&self, error: &PipelineError) {
        self.inner()
            .errors_total
            .with_label_values(&[error.kind()])
            .inc();
    }

    pub fn add_snapshots_inserted(&self, count: u64) {
        self.inner().snapshots_inserted.inc_by(count);
    }

    pub fn add_unmatched_usage(&self, count: u64) {
        self.inner().unmatched_usage.inc_by(count);
    }

    pub fn inc_groups_skipped(&self) {
        self.inner().groups_skipped.inc();
    }

    pub fn set_inventory(&self, nodes: i64, pods: i64) {
        self.inner().nodes_inventoried.set(nodes);
        self.inner().pods_inventoried.set(pods);
    }

    pub fn set_groups_calculated(&self, groups: i64) {
        self.inner().groups_calculated.set(groups);
    }
}

/// Structured logger for pipeline events
///
/// Emits event-tagged records so cycles and cost rows can be followed
/// in the JSON log stream.
#[derive(Clone)]
pub struct StructuredLogger {
    cluster: String,
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "service_started",
            cluster = %self.cluster,
            version = %version,
            "Cost pipeline started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "Cost pipeline shutting down"
        );
    }

    pub fn log_collection(&self, report: &CollectionReport) {
        match &report.error {
            None => info!(
                event = "collector_cycle",
                cluster = %self.cluster,
                nodes = report.nodes_upserted,
                pods = report.pods_upserted,
                snapshots = report.snapshots_inserted,
                unmatched_usage = report.unmatched_usage,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Collector cycle complete"
            ),
            Some(error) => warn!(
                event = "collector_cycle",
                cluster = %self.cluster,
                error_kind = error.kind(),
                error = %error,
                nodes = report.nodes_upserted,
                pods = report.pods_upserted,
                snapshots = report.snapshots_inserted,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Collector cycle incomplete"
            ),
        }
    }

    pub fn log_calculation(&self, report: &CalculationReport) {
        match &report.error {
            None => info!(
                event = "calculator_cycle",
                cluster = %self.cluster,
                date = %report.calculation_date,
                groups = report.groups_written,
                skipped = report.groups_skipped,
                pods = report.pods_considered,
                pods_without_usage = report.pods_without_usage,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Calculator cycle complete"
            ),
            Some(error) => warn!(
                event = "calculator_cycle",
                cluster = %self.cluster,
                date = %report.calculation_date,
                error_kind = error.kind(),
                error = %error,
                groups = report.groups_written,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Calculator cycle aborted"
            ),
        }
    }

    pub fn log_cost(&self, calculation: &CostCalculation) {
        info!(
            event = "cost_calculated",
            cluster = %self.cluster,
            namespace = %calculation.namespace,
            deployment = calculation.deployment.as_deref().unwrap_or(""),
            date = %calculation.calculation_date,
            daily_cost = calculation.daily_cost,
            wasted_cost = calculation.wasted_cost,
            efficiency_score = calculation.efficiency_score,
            pods = calculation.pod_count,
            "Cost calculated"
        );
    }

    pub fn log_group_skipped(&self, error: &PipelineError) {
        warn!(
            event = "group_skipped",
            cluster = %self.cluster,
            error = %error,
            "Skipping group with invalid rate inputs"
        );
    }
}
