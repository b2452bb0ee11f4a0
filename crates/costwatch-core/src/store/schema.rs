//! Table definitions for the snapshot store.
//!
//! Bootstrap only: every statement is idempotent. Versioned migrations are
//! owned by whoever operates the database.

use sqlx::SqlitePool;

use crate::error::StoreError;

/// Node inventory, upserted by node name.
pub const NODES_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id                 TEXT PRIMARY KEY,
    name               TEXT NOT NULL,
    node_type          TEXT NOT NULL,
    cpu_capacity_cores REAL NOT NULL CHECK (cpu_capacity_cores >= 0),
    memory_capacity_gb REAL NOT NULL CHECK (memory_capacity_gb >= 0),
    hourly_rate        REAL NOT NULL CHECK (hourly_rate >= 0),
    last_seen_at       INTEGER NOT NULL
);
"#;

/// Pod inventory, upserted by UID.
///
/// `node_id` is a weak reference and carries no foreign key.
pub const PODS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS pods (
    id                TEXT PRIMARY KEY,
    namespace         TEXT NOT NULL,
    name              TEXT NOT NULL,
    node_id           TEXT,
    deployment        TEXT,
    cpu_request_cores REAL NOT NULL,
    memory_request_gb REAL NOT NULL,
    created_at        INTEGER NOT NULL,
    last_seen_at      INTEGER NOT NULL
);
"#;

/// Append-only usage observations. The autoincrement id is the insertion order.
pub const USAGE_SNAPSHOTS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS usage_snapshots (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    pod_id      TEXT NOT NULL REFERENCES pods (id),
    cpu_cores   REAL NOT NULL,
    memory_gb   REAL NOT NULL,
    observed_at INTEGER NOT NULL
);
"#;

pub const USAGE_SNAPSHOTS_INDEX_DDL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_usage_snapshots_latest
    ON usage_snapshots (pod_id, observed_at DESC, id DESC);
"#;

/// One row per (namespace, deployment, date).
///
/// `deployment_key` is the deployment or `''`: a unique constraint would treat
/// NULL deployments as distinct and let namespace-level rows duplicate.
pub const COST_CALCULATIONS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS cost_calculations (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace             TEXT NOT NULL,
    deployment            TEXT,
    deployment_key        TEXT NOT NULL,
    hourly_cost           REAL NOT NULL,
    requested_hourly_cost REAL NOT NULL,
    daily_cost            REAL NOT NULL,
    wasted_cost           REAL NOT NULL,
    efficiency_score      REAL NOT NULL,
    pod_count             INTEGER NOT NULL,
    calculation_date      TEXT NOT NULL,
    computed_at           INTEGER NOT NULL,
    UNIQUE (namespace, deployment_key, calculation_date)
);
"#;

/// Create all tables and indexes that do not exist yet.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    for ddl in [
        NODES_TABLE_DDL,
        PODS_TABLE_DDL,
        USAGE_SNAPSHOTS_TABLE_DDL,
        USAGE_SNAPSHOTS_INDEX_DDL,
        COST_CALCULATIONS_TABLE_DDL,
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    tracing::info!("Snapshot store schema initialized");
    Ok(())
}
