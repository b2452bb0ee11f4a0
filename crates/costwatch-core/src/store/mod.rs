//! Snapshot store
//!
//! The store is the only state shared by the collector and the calculator.
//! Both only ever upsert by key or append, never delete, so no cross-service
//! locking is needed; concurrent upserts of the same key are last-writer-wins.

mod schema;
mod sqlite;

pub use schema::init_schema;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::models::{
    CostCalculation, NewUsageSnapshot, Node, Pod, StoredCostCalculation, UsageSnapshot,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Persistence operations used by the pipeline
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or update nodes keyed by id
    async fn upsert_nodes(&self, nodes: &[Node]) -> Result<(), StoreError>;

    /// Insert or update pods keyed by id
    async fn upsert_pods(&self, pods: &[Pod]) -> Result<(), StoreError>;

    /// Append usage snapshots; returns the number of rows inserted
    async fn insert_snapshots(&self, snapshots: &[NewUsageSnapshot]) -> Result<u64, StoreError>;

    /// Insert or replace the calculation for (namespace, deployment, date)
    async fn upsert_cost_calculation(&self, calculation: &CostCalculation)
        -> Result<(), StoreError>;

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError>;

    /// Pods, optionally restricted to those seen at or after `seen_since`
    async fn list_pods(&self, seen_since: Option<DateTime<Utc>>) -> Result<Vec<Pod>, StoreError>;

    /// The latest snapshot of every pod that has at least one.
    /// Latest is the highest observation time, ties going to the last inserted.
    async fn latest_snapshots(&self) -> Result<Vec<UsageSnapshot>, StoreError>;

    async fn list_cost_calculations(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<StoredCostCalculation>, StoreError>;

    async fn snapshot_count(&self) -> Result<i64, StoreError>;
}
