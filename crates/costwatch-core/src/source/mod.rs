//! External data sources consumed by the collector
//!
//! The collector only sees these traits, so tests can substitute fakes for
//! the cluster API and the metrics endpoint.

mod kubernetes;

pub use kubernetes::{
    node_from_k8s, pod_from_k8s, pod_usage_from_metrics, ContainerMetrics, KubeClusterSource,
    KubeMetricsSource, KubeSourceConfig, PodMetrics,
};

use crate::error::SourceError;
use crate::models::{Inventory, PodUsage};
use async_trait::async_trait;

/// Control-plane source of node and pod inventory
#[async_trait]
pub trait ClusterSource: Send + Sync {
    /// Fetch the full current set of nodes and pods
    async fn fetch_inventory(&self) -> Result<Inventory, SourceError>;
}

/// Source of current per-pod resource usage
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Fetch the current usage of every pod the source knows about
    async fn fetch_usage(&self) -> Result<Vec<PodUsage>, SourceError>;
}
