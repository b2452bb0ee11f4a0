//! SQLite snapshot store using sqlx.
//!
//! Every write is a single `INSERT ... ON CONFLICT DO UPDATE` (or a plain
//! append for usage snapshots), so no read-then-write race exists even if
//! cycles of the two services overlap.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::FromRow;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use super::{init_schema, SnapshotStore};
use crate::error::StoreError;
use crate::models::{
    CostCalculation, NewUsageSnapshot, Node, Pod, StoredCostCalculation, UsageSnapshot,
};

/// Default maximum connections in the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default connection acquire timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for a single store operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

const DATE_FORMAT: &str = "%Y-%m-%d";

const UPSERT_NODE_SQL: &str = r#"
INSERT INTO nodes (id, name, node_type, cpu_capacity_cores, memory_capacity_gb, hourly_rate, last_seen_at)
VALUES (?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (id) DO UPDATE SET
    name = excluded.name,
    node_type = excluded.node_type,
    cpu_capacity_cores = excluded.cpu_capacity_cores,
    memory_capacity_gb = excluded.memory_capacity_gb,
    hourly_rate = excluded.hourly_rate,
    last_seen_at = excluded.last_seen_at
"#;

const UPSERT_POD_SQL: &str = r#"
INSERT INTO pods (id, namespace, name, node_id, deployment, cpu_request_cores, memory_request_gb, created_at, last_seen_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (id) DO UPDATE SET
    namespace = excluded.namespace,
    name = excluded.name,
    node_id = excluded.node_id,
    deployment = excluded.deployment,
    cpu_request_cores = excluded.cpu_request_cores,
    memory_request_gb = excluded.memory_request_gb,
    last_seen_at = excluded.last_seen_at
"#;

const INSERT_SNAPSHOT_SQL: &str = r#"
INSERT INTO usage_snapshots (pod_id, cpu_cores, memory_gb, observed_at)
VALUES (?, ?, ?, ?)
"#;

const UPSERT_COST_SQL: &str = r#"
INSERT INTO cost_calculations (
    namespace, deployment, deployment_key, hourly_cost, requested_hourly_cost,
    daily_cost, wasted_cost, efficiency_score, pod_count, calculation_date, computed_at
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (namespace, deployment_key, calculation_date) DO UPDATE SET
    deployment = excluded.deployment,
    hourly_cost = excluded.hourly_cost,
    requested_hourly_cost = excluded.requested_hourly_cost,
    daily_cost = excluded.daily_cost,
    wasted_cost = excluded.wasted_cost,
    efficiency_score = excluded.efficiency_score,
    pod_count = excluded.pod_count,
    computed_at = excluded.computed_at
"#;

const LATEST_SNAPSHOTS_SQL: &str = r#"
SELECT s.id, s.pod_id, s.cpu_cores, s.memory_gb, s.observed_at
FROM usage_snapshots s
WHERE s.id = (
    SELECT latest.id
    FROM usage_snapshots latest
    WHERE latest.pod_id = s.pod_id
    ORDER BY latest.observed_at DESC, latest.id DESC
    LIMIT 1
)
ORDER BY s.pod_id
"#;

#[derive(Debug, FromRow)]
struct NodeRow {
    id: String,
    name: String,
    node_type: String,
    cpu_capacity_cores: f64,
    memory_capacity_gb: f64,
    hourly_rate: f64,
    last_seen_at: i64,
}

impl TryFrom<NodeRow> for Node {
    type Error = StoreError;

    fn try_from(row: NodeRow) -> Result<Self, Self::Error> {
        Ok(Node {
            id: row.id,
            name: row.name,
            node_type: row.node_type,
            cpu_capacity_cores: row.cpu_capacity_cores,
            memory_capacity_gb: row.memory_capacity_gb,
            hourly_rate: row.hourly_rate,
            last_seen_at: from_millis(row.last_seen_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct PodRow {
    id: String,
    namespace: String,
    name: String,
    node_id: Option<String>,
    deployment: Option<String>,
    cpu_request_cores: f64,
    memory_request_gb: f64,
    created_at: i64,
    last_seen_at: i64,
}

impl TryFrom<PodRow> for Pod {
    type Error = StoreError;

    fn try_from(row: PodRow) -> Result<Self, Self::Error> {
        Ok(Pod {
            id: row.id,
            namespace: row.namespace,
            name: row.name,
            node_id: row.node_id,
            deployment: row.deployment,
            cpu_request_cores: row.cpu_request_cores,
            memory_request_gb: row.memory_request_gb,
            created_at: from_millis(row.created_at)?,
            last_seen_at: from_millis(row.last_seen_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct SnapshotRow {
    id: i64,
    pod_id: String,
    cpu_cores: f64,
    memory_gb: f64,
    observed_at: i64,
}

impl TryFrom<SnapshotRow> for UsageSnapshot {
    type Error = StoreError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        Ok(UsageSnapshot {
            id: row.id,
            pod_id: row.pod_id,
            cpu_cores: row.cpu_cores,
            memory_gb: row.memory_gb,
            observed_at: from_millis(row.observed_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct CostRow {
    id: i64,
    namespace: String,
    deployment: Option<String>,
    hourly_cost: f64,
    requested_hourly_cost: f64,
    daily_cost: f64,
    wasted_cost: f64,
    efficiency_score: f64,
    pod_count: i64,
    calculation_date: String,
    computed_at: i64,
}

impl TryFrom<CostRow> for StoredCostCalculation {
    type Error = StoreError;

    fn try_from(row: CostRow) -> Result<Self, Self::Error> {
        let calculation_date = NaiveDate::parse_from_str(&row.calculation_date, DATE_FORMAT)
            .map_err(|e| {
                StoreError::InvalidData(format!(
                    "calculation date {:?}: {e}",
                    row.calculation_date
                ))
            })?;
        let pod_count = u32::try_from(row.pod_count)
            .map_err(|_| StoreError::InvalidData(format!("pod count {}", row.pod_count)))?;

        Ok(StoredCostCalculation {
            id: row.id,
            calculation: CostCalculation {
                namespace: row.namespace,
                deployment: row.deployment,
                hourly_cost: row.hourly_cost,
                requested_hourly_cost: row.requested_hourly_cost,
                daily_cost: row.daily_cost,
                wasted_cost: row.wasted_cost,
                efficiency_score: row.efficiency_score,
                pod_count,
                calculation_date,
                computed_at: from_millis(row.computed_at)?,
            },
        })
    }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StoreError::InvalidData(format!("timestamp {millis} out of range")))
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Snapshot store backed by a SQLite connection pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    op_timeout: Duration,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Parse a connection string without connecting.
    pub fn parse_url(url: &str) -> Result<SqliteConnectOptions, StoreError> {
        Ok(SqliteConnectOptions::from_str(url)?)
    }

    /// Connect to a SQLite database and create missing tables.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL, e.g., `sqlite:costwatch.db?mode=rwc`
    /// * `op_timeout` - deadline applied to every store operation
    ///
    /// File databases use WAL journaling so the two services can read and
    /// write concurrently. In-memory databases are confined to a single
    /// connection that is never recycled, since each connection would
    /// otherwise see its own empty database.
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let options = Self::parse_url(url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true);

        let pool_options = if is_in_memory(url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(DEFAULT_MAX_CONNECTIONS)
        };

        let pool = pool_options
            .acquire_timeout(DEFAULT_CONNECT_TIMEOUT)
            .connect_with(options)
            .await?;

        init_schema(&pool).await?;

        Ok(Self { pool, op_timeout })
    }

    /// Private in-memory store.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:", DEFAULT_OPERATION_TIMEOUT).await
    }

    /// Underlying pool for direct queries.
    #[inline]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn with_deadline<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.op_timeout, operation)
            .await
            .map_err(|_| StoreError::Timeout(self.op_timeout))?
    }

    async fn write_nodes(&self, nodes: &[Node]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for node in nodes {
            sqlx::query(UPSERT_NODE_SQL)
                .bind(node.id.as_str())
                .bind(node.name.as_str())
                .bind(node.node_type.as_str())
                .bind(node.cpu_capacity_cores)
                .bind(node.memory_capacity_gb)
                .bind(node.hourly_rate)
                .bind(node.last_seen_at.timestamp_millis())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_pods(&self, pods: &[Pod]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for pod in pods {
            sqlx::query(UPSERT_POD_SQL)
                .bind(pod.id.as_str())
                .bind(pod.namespace.as_str())
                .bind(pod.name.as_str())
                .bind(pod.node_id.as_deref())
                .bind(pod.deployment.as_deref())
                .bind(pod.cpu_request_cores)
                .bind(pod.memory_request_gb)
                .bind(pod.created_at.timestamp_millis())
                .bind(pod.last_seen_at.timestamp_millis())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_snapshots(&self, snapshots: &[NewUsageSnapshot]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for snapshot in snapshots {
            inserted += sqlx::query(INSERT_SNAPSHOT_SQL)
                .bind(snapshot.pod_id.as_str())
                .bind(snapshot.cpu_cores)
                .bind(snapshot.memory_gb)
                .bind(snapshot.observed_at.timestamp_millis())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn write_cost(&self, calculation: &CostCalculation) -> Result<(), StoreError> {
        sqlx::query(UPSERT_COST_SQL)
            .bind(calculation.namespace.as_str())
            .bind(calculation.deployment.as_deref())
            .bind(calculation.deployment.as_deref().unwrap_or(""))
            .bind(calculation.hourly_cost)
            .bind(calculation.requested_hourly_cost)
            .bind(calculation.daily_cost)
            .bind(calculation.wasted_cost)
            .bind(calculation.efficiency_score)
            .bind(i64::from(calculation.pod_count))
            .bind(calculation.calculation_date.format(DATE_FORMAT).to_string())
            .bind(calculation.computed_at.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn read_nodes(&self) -> Result<Vec<Node>, StoreError> {
        sqlx::query_as::<_, NodeRow>(
            "SELECT id, name, node_type, cpu_capacity_cores, memory_capacity_gb, hourly_rate, last_seen_at
             FROM nodes ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Node::try_from)
        .collect()
    }

    async fn read_pods(&self, seen_since: Option<DateTime<Utc>>) -> Result<Vec<Pod>, StoreError> {
        let since = seen_since.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN);

        sqlx::query_as::<_, PodRow>(
            "SELECT id, namespace, name, node_id, deployment, cpu_request_cores, memory_request_gb,
                    created_at, last_seen_at
             FROM pods WHERE last_seen_at >= ? ORDER BY namespace, name, id",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Pod::try_from)
        .collect()
    }

    async fn read_latest_snapshots(&self) -> Result<Vec<UsageSnapshot>, StoreError> {
        sqlx::query_as::<_, SnapshotRow>(LATEST_SNAPSHOTS_SQL)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(UsageSnapshot::try_from)
            .collect()
    }

    async fn read_costs(&self, date: NaiveDate) -> Result<Vec<StoredCostCalculation>, StoreError> {
        sqlx::query_as::<_, CostRow>(
            "SELECT id, namespace, deployment, hourly_cost, requested_hourly_cost, daily_cost,
                    wasted_cost, efficiency_score, pod_count, calculation_date, computed_at
             FROM cost_calculations WHERE calculation_date = ?
             ORDER BY namespace, deployment_key",
        )
        .bind(date.format(DATE_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(StoredCostCalculation::try_from)
        .collect()
    }

    async fn count_snapshots(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM usage_snapshots")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn upsert_nodes(&self, nodes: &[Node]) -> Result<(), StoreError> {
        self.with_deadline(self.write_nodes(nodes)).await
    }

    async fn upsert_pods(&self, pods: &[Pod]) -> Result<(), StoreError> {
        self.with_deadline(self.write_pods(pods)).await
    }

    async fn insert_snapshots(&self, snapshots: &[NewUsageSnapshot]) -> Result<u64, StoreError> {
        self.with_deadline(self.write_snapshots(snapshots)).await
    }

    async fn upsert_cost_calculation(
        &self,
        calculation: &CostCalculation,
    ) -> Result<(), StoreError> {
        self.with_deadline(self.write_cost(calculation)).await
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        self.with_deadline(self.read_nodes()).await
    }

    async fn list_pods(&self, seen_since: Option<DateTime<Utc>>) -> Result<Vec<Pod>, StoreError> {
        self.with_deadline(self.read_pods(seen_since)).await
    }

    async fn latest_snapshots(&self) -> Result<Vec<UsageSnapshot>, StoreError> {
        self.with_deadline(self.read_latest_snapshots()).await
    }

    async fn list_cost_calculations(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<StoredCostCalculation>, StoreError> {
        self.with_deadline(self.read_costs(date)).await
    }

    async fn snapshot_count(&self) -> Result<i64, StoreError> {
        self.with_deadline(self.count_snapshots()).await
    }
}
