//! Fakes and fixtures shared by the unit tests

use crate::clock::{Clock, Ticker};
use crate::error::{SourceError, StoreError};
use crate::models::{
    CostCalculation, Inventory, NewUsageSnapshot, Node, Pod, PodUsage, StoredCostCalculation,
    UsageSnapshot,
};
use crate::store::{SnapshotStore, SqliteStore};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// 2024-05-01 at the given hour and minute, UTC
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0)
        .single()
        .expect("valid fixture time")
}

pub fn fixture_date() -> NaiveDate {
    at(0, 0).date_naive()
}

pub fn node(id: &str, hourly_rate: f64, seen: DateTime<Utc>) -> Node {
    Node {
        id: id.to_string(),
        name: id.to_string(),
        node_type: "m5.large".to_string(),
        cpu_capacity_cores: 2.0,
        memory_capacity_gb: 8.0,
        hourly_rate,
        last_seen_at: seen,
    }
}

pub fn pod(uid: &str, namespace: &str, name: &str, cpu: f64, memory_gb: f64) -> Pod {
    Pod {
        id: uid.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        node_id: Some("n1".to_string()),
        deployment: None,
        cpu_request_cores: cpu,
        memory_request_gb: memory_gb,
        created_at: at(0, 0),
        last_seen_at: at(12, 0),
    }
}

pub fn usage(namespace: &str, name: &str, cpu: f64, memory_gb: f64) -> PodUsage {
    PodUsage {
        namespace: namespace.to_string(),
        name: name.to_string(),
        cpu_cores: cpu,
        memory_gb,
        observed_at: None,
    }
}

/// Clock that only moves when told to
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Ticker that fires a fixed number of times, then stops the loop
pub struct CountedTicker {
    remaining: usize,
}

impl CountedTicker {
    pub fn new(ticks: usize) -> Self {
        Self { remaining: ticks }
    }
}

#[async_trait]
impl Ticker for CountedTicker {
    async fn tick(&mut self) -> bool {
        tokio::task::yield_now().await;
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

/// Control-plane source serving a settable inventory
pub struct FakeClusterSource {
    inventory: Mutex<Inventory>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeClusterSource {
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inventory: Mutex::new(inventory),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_inventory(&self, inventory: Inventory) {
        *self.inventory.lock().unwrap() = inventory;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl crate::source::ClusterSource for FakeClusterSource {
    async fn fetch_inventory(&self) -> Result<Inventory, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::Other("connection refused".to_string()));
        }
        Ok(self.inventory.lock().unwrap().clone())
    }
}

/// Metrics source serving a settable list of samples
pub struct FakeMetricsSource {
    usage: Mutex<Vec<PodUsage>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeMetricsSource {
    pub fn new(usage: Vec<PodUsage>) -> Self {
        Self {
            usage: Mutex::new(usage),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_usage(&self, usage: Vec<PodUsage>) {
        *self.usage.lock().unwrap() = usage;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl crate::source::MetricsSource for FakeMetricsSource {
    async fn fetch_usage(&self) -> Result<Vec<PodUsage>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::Other("metrics api not available".to_string()));
        }
        Ok(self.usage.lock().unwrap().clone())
    }
}

/// In-memory store that counts write calls and can be told to fail them
pub struct RecordingStore {
    inner: SqliteStore,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl RecordingStore {
    pub async fn new() -> Self {
        Self {
            inner: SqliteStore::in_memory().await.unwrap(),
            writes: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn begin_write(&self) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout(Duration::from_millis(5)));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for RecordingStore {
    async fn upsert_nodes(&self, nodes: &[Node]) -> Result<(), StoreError> {
        self.begin_write()?;
        self.inner.upsert_nodes(nodes).await
    }

    async fn upsert_pods(&self, pods: &[Pod]) -> Result<(), StoreError> {
        self.begin_write()?;
        self.inner.upsert_pods(pods).await
    }

    async fn insert_snapshots(&self, snapshots: &[NewUsageSnapshot]) -> Result<u64, StoreError> {
        self.begin_write()?;
        self.inner.insert_snapshots(snapshots).await
    }

    async fn upsert_cost_calculation(
        &self,
        calculation: &CostCalculation,
    ) -> Result<(), StoreError> {
        self.begin_write()?;
        self.inner.upsert_cost_calculation(calculation).await
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        self.inner.list_nodes().await
    }

    async fn list_pods(&self, seen_since: Option<DateTime<Utc>>) -> Result<Vec<Pod>, StoreError> {
        self.inner.list_pods(seen_since).await
    }

    async fn latest_snapshots(&self) -> Result<Vec<UsageSnapshot>, StoreError> {
        self.inner.latest_snapshots().await
    }

    async fn list_cost_calculations(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<StoredCostCalculation>, StoreError> {
        self.inner.list_cost_calculations(date).await
    }

    async fn snapshot_count(&self) -> Result<i64, StoreError> {
        self.inner.snapshot_count().await
    }
}
