//! Cluster cost telemetry pipeline
//!
//! This crate provides:
//! - A collector that snapshots node and pod inventory and live usage
//! - A calculator that turns the latest usage into daily cost rows
//! - The SQLite snapshot store both services share
//! - Health checks, Prometheus metrics and structured logging

pub mod api;
pub mod calculator;
pub mod clock;
pub mod collector;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod pricing;
pub mod quantity;
pub mod retry;
pub mod source;
pub mod store;

#[cfg(test)]
mod test_support;

pub use calculator::{CalculationReport, CalculatorLoop, CalculatorLoopBuilder};
pub use clock::{Clock, IntervalTicker, SystemClock, Ticker};
pub use collector::{CollectionReport, CollectorLoop, CollectorLoopBuilder};
pub use error::{PipelineError, SourceError, StoreError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
pub use pricing::{PricingConfig, Rates};
pub use retry::RetryPolicy;
pub use store::{SnapshotStore, SqliteStore};
