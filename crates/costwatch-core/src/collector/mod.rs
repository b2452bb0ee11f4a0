//! Inventory and usage collection
//!
//! The collector snapshots cluster topology and live usage into the store.
//! Each cycle upserts the full node and pod inventory, then appends one usage
//! snapshot per pod the metrics source reports on.

mod r#loop;


pub use r#loop::{CollectorConfig, CollectorLoop, CollectorLoopBuilder};

use crate::error::PipelineError;
use crate::models::{NewUsageSnapshot, Pod, PodUsage};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Summary of one collector cycle
#[derive(Debug)]
pub struct CollectionReport {
    pub started_at: DateTime<Utc>,
    pub nodes_upserted: usize,
    pub pods_upserted: usize,
    pub usage_samples: usize,
    pub snapshots_inserted: u64,
    /// Samples whose pod was not part of this cycle's inventory
    pub unmatched_usage: usize,
    pub elapsed: Duration,
    pub error: Option<PipelineError>,
}

impl CollectionReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            nodes_upserted: 0,
            pods_upserted: 0,
            usage_samples: 0,
            snapshots_inserted: 0,
            unmatched_usage: 0,
            elapsed: Duration::ZERO,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Outcome label: `partial` when the inventory committed but usage did not
    pub fn outcome(&self) -> &'static str {
        match &self.error {
            None => "ok",
            Some(PipelineError::MetricsUnavailable(_)) => "partial",
            Some(_) => "failed",
        }
    }
}

/// Resolve usage samples to pod UIDs of the given inventory.
///
/// Returns the snapshots to append and the number of samples dropped because
/// their (namespace, name) matched no pod. Samples without a timestamp are
/// stamped with `fallback_time`.
pub fn resolve_usage(
    pods: &[Pod],
    usage: &[PodUsage],
    fallback_time: DateTime<Utc>,
) -> (Vec<NewUsageSnapshot>, usize) {
    let uids: HashMap<(&str, &str), &str> = pods
        .iter()
        .map(|p| ((p.namespace.as_str(), p.name.as_str()), p.id.as_str()))
        .collect();

    let mut snapshots = Vec::with_capacity(usage.len());
    let mut unmatched = 0;

    for sample in usage {
        match uids.get(&(sample.namespace.as_str(), sample.name.as_str())) {
            Some(uid) => snapshots.push(NewUsageSnapshot {
                pod_id: (*uid).to_string(),
                cpu_cores: sample.cpu_cores,
                memory_gb: sample.memory_gb,
                observed_at: sample.observed_at.unwrap_or(fallback_time),
            }),
            None => {
                tracing::debug!(
                    namespace = %sample.namespace,
                    pod = %sample.name,
                    "Dropping usage sample for pod outside the inventory"
                );
                unmatched += 1;
            }
        }
    }

    (snapshots, unmatched)
}
