//! Core data models for the cost telemetry pipeline

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Bytes in one GB as used throughout the pipeline (binary gigabyte)
pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Cluster compute unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node name, which is also what pods reference
    pub id: String,
    pub name: String,
    pub node_type: String,
    pub cpu_capacity_cores: f64,
    pub memory_capacity_gb: f64,
    pub hourly_rate: f64,
    pub last_seen_at: DateTime<Utc>,
}

/// Scheduled workload instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    /// Pod UID
    pub id: String,
    pub namespace: String,
    pub name: String,
    /// Weak reference; may name a node that is not in the inventory
    pub node_id: Option<String>,
    pub deployment: Option<String>,
    pub cpu_request_cores: f64,
    pub memory_request_gb: f64,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Point-in-time usage observation for one pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub id: i64,
    pub pod_id: String,
    pub cpu_cores: f64,
    pub memory_gb: f64,
    pub observed_at: DateTime<Utc>,
}

/// Usage observation that has not been persisted yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewUsageSnapshot {
    pub pod_id: String,
    pub cpu_cores: f64,
    pub memory_gb: f64,
    pub observed_at: DateTime<Utc>,
}

/// Aggregated cost for one workload grouping on one calendar date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostCalculation {
    pub namespace: String,
    /// `None` is the namespace-level aggregate
    pub deployment: Option<String>,
    pub hourly_cost: f64,
    pub requested_hourly_cost: f64,
    pub daily_cost: f64,
    /// Daily wasted cost
    pub wasted_cost: f64,
    pub efficiency_score: f64,
    pub pod_count: u32,
    pub calculation_date: NaiveDate,
    pub computed_at: DateTime<Utc>,
}

/// Inventory returned by the control-plane source in one fetch
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub nodes: Vec<Node>,
    pub pods: Vec<Pod>,
}

/// Current usage of one pod as reported by the metrics source
#[derive(Debug, Clone, PartialEq)]
pub struct PodUsage {
    pub namespace: String,
    pub name: String,
    pub cpu_cores: f64,
    pub memory_gb: f64,
    /// Sample time reported by the source, if any
    pub observed_at: Option<DateTime<Utc>>,
}

/// Cost calculation as persisted, with its row identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCostCalculation {
    pub id: i64,
    #[serde(flatten)]
    pub calculation: CostCalculation,
}
