//! End-to-end runs of the collector and calculator over one SQLite store

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use costwatch_core::{
    source::{ClusterSource, MetricsSource},
    CalculatorLoopBuilder, Clock, CollectorLoopBuilder, Inventory, Node, Pod, PodUsage,
    RetryPolicy, SnapshotStore, SourceError, SqliteStore,
};
use std::sync::Arc;
use std::time::Duration;

struct StaticClock(DateTime<Utc>);

impl Clock for StaticClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

struct StaticCluster(Inventory);

#[async_trait]
impl ClusterSource for StaticCluster {
    async fn fetch_inventory(&self) -> Result<Inventory, SourceError> {
        Ok(self.0.clone())
    }
}

struct StaticUsage(Vec<PodUsage>);

#[async_trait]
impl MetricsSource for StaticUsage {
    async fn fetch_usage(&self) -> Result<Vec<PodUsage>, SourceError> {
        Ok(self.0.clone())
    }
}

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn inventory() -> Inventory {
    Inventory {
        nodes: vec![Node {
            id: "n1".to_string(),
            name: "n1".to_string(),
            node_type: "m5.large".to_string(),
            cpu_capacity_cores: 2.0,
            memory_capacity_gb: 8.0,
            hourly_rate: 0.096,
            last_seen_at: noon(),
        }],
        pods: vec![Pod {
            id: "p1".to_string(),
            namespace: "shop".to_string(),
            name: "web-0".to_string(),
            node_id: Some("n1".to_string()),
            deployment: Some("web".to_string()),
            cpu_request_cores: 1.0,
            memory_request_gb: 2.0,
            created_at: noon(),
            last_seen_at: noon(),
        }],
    }
}

#[tokio::test]
async fn test_collected_usage_flows_into_cost_rows() {
    let store: Arc<dyn SnapshotStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
    let clock = Arc::new(StaticClock(noon()));

    let collector = CollectorLoopBuilder::new()
        .cluster_source(Arc::new(StaticCluster(inventory())))
        .metrics_source(Arc::new(StaticUsage(vec![PodUsage {
            namespace: "shop".to_string(),
            name: "web-0".to_string(),
            cpu_cores: 0.5,
            memory_gb: 1.0,
            observed_at: None,
        }])))
        .store(store.clone())
        .clock(clock.clone())
        .retry(RetryPolicy::single_attempt(Duration::from_secs(1)))
        .build()
        .unwrap();

    let calculator = CalculatorLoopBuilder::new()
        .store(store.clone())
        .clock(clock)
        .build()
        .unwrap();

    let collected = collector.run_cycle().await;
    assert!(collected.is_success(), "{:?}", collected.error);

    let calculated = calculator.run_cycle().await;
    assert!(calculated.is_success(), "{:?}", calculated.error);
    assert_eq!(calculated.groups_written, 2);

    let rows = store
        .list_cost_calculations(noon().date_naive())
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    for row in rows {
        let c = row.calculation;
        assert!((c.hourly_cost - 0.0195).abs() < 1e-9);
        assert!((c.efficiency_score - 50.0).abs() < 1e-9);
        assert!((c.daily_cost - 0.468).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_file_database_is_shared_between_services() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("costwatch.db").display());

    let collector_store = SqliteStore::connect(&url, Duration::from_secs(5))
        .await
        .unwrap();
    let calculator_store = SqliteStore::connect(&url, Duration::from_secs(5))
        .await
        .unwrap();

    collector_store.upsert_nodes(&inventory().nodes).await.unwrap();
    collector_store.upsert_pods(&inventory().pods).await.unwrap();

    let pods = calculator_store.list_pods(None).await.unwrap();
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0].deployment.as_deref(), Some("web"));

    collector_store.close().await;
    calculator_store.close().await;
}
