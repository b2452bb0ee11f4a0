//! Kubernetes-backed sources
//!
//! Inventory comes from the core API (`Node`, `Pod`), usage from the
//! `metrics.k8s.io/v1beta1` `PodMetrics` resource served by metrics-server.

use super::{ClusterSource, MetricsSource};
use crate::clock::Clock;
use crate::error::SourceError;
use crate::models::{Inventory, Node, Pod, PodUsage};
use crate::pricing::PricingConfig;
use crate::quantity::{cpu_cores, memory_gb};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Container, Node as K8sNode, Pod as K8sPod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";
const INSTANCE_TYPE_LABELS: [&str; 2] = [
    "node.kubernetes.io/instance-type",
    "beta.kubernetes.io/instance-type",
];
const UNKNOWN_NODE_TYPE: &str = "unknown";

/// Pod phases whose pods no longer hold their requests
const TERMINAL_PHASES: [&str; 2] = ["Succeeded", "Failed"];

/// Connection settings for the Kubernetes API
#[derive(Debug, Clone, Default)]
pub struct KubeSourceConfig {
    /// Explicit kubeconfig; in-cluster or default discovery when unset
    pub kubeconfig: Option<PathBuf>,
}

impl KubeSourceConfig {
    /// Build a client from the configured kubeconfig or the environment
    pub async fn connect(&self) -> Result<Client, SourceError> {
        let config = match &self.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    SourceError::Other(format!("reading kubeconfig {}: {e}", path.display()))
                })?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| SourceError::Other(format!("loading kubeconfig: {e}")))?
            }
            None => kube::Config::infer()
                .await
                .map_err(|e| SourceError::Other(format!("inferring cluster config: {e}")))?,
        };

        Ok(Client::try_from(config)?)
    }
}

/// `metrics.k8s.io/v1beta1` pod usage
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PodMetrics {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub timestamp: Option<Time>,
    #[serde(default)]
    pub window: Option<String>,
    #[serde(default)]
    pub containers: Vec<ContainerMetrics>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContainerMetrics {
    pub name: String,
    #[serde(default)]
    pub usage: BTreeMap<String, Quantity>,
}

impl k8s_openapi::Resource for PodMetrics {
    type Scope = k8s_openapi::NamespaceResourceScope;

    const API_VERSION: &'static str = "metrics.k8s.io/v1beta1";
    const GROUP: &'static str = "metrics.k8s.io";
    const KIND: &'static str = "PodMetrics";
    const URL_PATH_SEGMENT: &'static str = "pods";
    const VERSION: &'static str = "v1beta1";
}

impl k8s_openapi::Metadata for PodMetrics {
    type Ty = ObjectMeta;

    fn metadata(&self) -> &Self::Ty {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Self::Ty {
        &mut self.metadata
    }
}

fn label<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .map(String::as_str)
}

fn sum_resource(
    resources: Option<&BTreeMap<String, Quantity>>,
    key: &str,
    parse: fn(&Quantity) -> Result<f64, SourceError>,
) -> Result<f64, SourceError> {
    resources
        .and_then(|r| r.get(key))
        .map(parse)
        .transpose()
        .map(|v| v.unwrap_or(0.0))
}

fn container_requests(container: &Container) -> Result<(f64, f64), SourceError> {
    let requests = container
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref());
    Ok((
        sum_resource(requests, "cpu", cpu_cores)?,
        sum_resource(requests, "memory", memory_gb)?,
    ))
}

/// Convert a core `Node` into inventory, pricing it by node type
pub fn node_from_k8s(
    node: &K8sNode,
    pricing: &PricingConfig,
    seen_at: DateTime<Utc>,
) -> Result<Node, SourceError> {
    let meta = &node.metadata;
    let id = meta
        .name
        .clone()
        .ok_or_else(|| SourceError::Other("node without a name".to_string()))?;

    let node_type = INSTANCE_TYPE_LABELS
        .iter()
        .find_map(|key| label(meta, key))
        .unwrap_or(UNKNOWN_NODE_TYPE)
        .to_string();

    let capacity = node.status.as_ref().and_then(|s| s.capacity.as_ref());

    Ok(Node {
        name: label(meta, HOSTNAME_LABEL).unwrap_or(&id).to_string(),
        hourly_rate: pricing.node_hourly_rate(&node_type),
        cpu_capacity_cores: sum_resource(capacity, "cpu", cpu_cores)?,
        memory_capacity_gb: sum_resource(capacity, "memory", memory_gb)?,
        node_type,
        id,
        last_seen_at: seen_at,
    })
}

/// Convert a core `Pod` into inventory
///
/// Requests follow the scheduler's effective-request rule: the larger of the
/// summed app containers and the largest init container, plus pod overhead.
/// `deployment_label` names the label holding the deployment attribution.
pub fn pod_from_k8s(
    pod: &K8sPod,
    deployment_label: Option<&str>,
    seen_at: DateTime<Utc>,
) -> Result<Pod, SourceError> {
    let meta = &pod.metadata;
    let id = meta
        .uid
        .clone()
        .ok_or_else(|| SourceError::Other("pod without a uid".to_string()))?;
    let name = meta
        .name
        .clone()
        .ok_or_else(|| SourceError::Other(format!("pod {id} without a name")))?;

    let (mut cpu, mut memory) = (0.0, 0.0);
    let mut node_id = None;

    if let Some(spec) = &pod.spec {
        for container in &spec.containers {
            let (c, m) = container_requests(container)?;
            cpu += c;
            memory += m;
        }
        for container in spec.init_containers.iter().flatten() {
            let (c, m) = container_requests(container)?;
            cpu = f64::max(cpu, c);
            memory = f64::max(memory, m);
        }
        cpu += sum_resource(spec.overhead.as_ref(), "cpu", cpu_cores)?;
        memory += sum_resource(spec.overhead.as_ref(), "memory", memory_gb)?;
        node_id = spec.node_name.clone();
    }

    let deployment = deployment_label
        .and_then(|key| label(meta, key))
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    Ok(Pod {
        id,
        namespace: meta.namespace.clone().unwrap_or_else(|| "default".to_string()),
        name,
        node_id,
        deployment,
        cpu_request_cores: cpu,
        memory_request_gb: memory,
        created_at: meta
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .unwrap_or(seen_at),
        last_seen_at: seen_at,
    })
}

/// Sum container usage of one `PodMetrics` object
pub fn pod_usage_from_metrics(metrics: &PodMetrics) -> Result<PodUsage, SourceError> {
    let name = metrics
        .metadata
        .name
        .clone()
        .ok_or_else(|| SourceError::Other("pod metrics without a name".to_string()))?;

    let (mut cpu, mut memory) = (0.0, 0.0);
    for container in &metrics.containers {
        cpu += sum_resource(Some(&container.usage), "cpu", cpu_cores)?;
        memory += sum_resource(Some(&container.usage), "memory", memory_gb)?;
    }

    Ok(PodUsage {
        namespace: metrics
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string()),
        name,
        cpu_cores: cpu,
        memory_gb: memory,
        observed_at: metrics.timestamp.as_ref().map(|t| t.0),
    })
}

/// Inventory source backed by the Kubernetes core API
pub struct KubeClusterSource {
    client: Client,
    pricing: PricingConfig,
    deployment_label: Option<String>,
    clock: Arc<dyn Clock>,
}

impl KubeClusterSource {
    pub fn new(
        client: Client,
        pricing: PricingConfig,
        deployment_label: Option<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            pricing,
            deployment_label,
            clock,
        }
    }
}

#[async_trait]
impl ClusterSource for KubeClusterSource {
    async fn fetch_inventory(&self) -> Result<Inventory, SourceError> {
        let nodes: Api<K8sNode> = Api::all(self.client.clone());
        let pods: Api<K8sPod> = Api::all(self.client.clone());
        let params = ListParams::default();

        let (node_list, pod_list) = tokio::try_join!(nodes.list(&params), pods.list(&params))?;
        let seen_at = self.clock.now();

        let mut inventory = Inventory::default();

        for node in &node_list.items {
            match node_from_k8s(node, &self.pricing, seen_at) {
                Ok(node) => inventory.nodes.push(node),
                Err(e) => warn!(node = ?node.metadata.name, error = %e, "Skipping malformed node"),
            }
        }

        for pod in &pod_list.items {
            let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
            if phase.is_some_and(|p| TERMINAL_PHASES.contains(&p)) {
                continue;
            }

            match pod_from_k8s(pod, self.deployment_label.as_deref(), seen_at) {
                Ok(pod) => inventory.pods.push(pod),
                Err(e) => warn!(
                    namespace = ?pod.metadata.namespace,
                    pod = ?pod.metadata.name,
                    error = %e,
                    "Skipping malformed pod"
                ),
            }
        }

        debug!(
            nodes = inventory.nodes.len(),
            pods = inventory.pods.len(),
            "Fetched cluster inventory"
        );
        Ok(inventory)
    }
}

/// Usage source backed by the metrics API
pub struct KubeMetricsSource {
    client: Client,
}

impl KubeMetricsSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetricsSource for KubeMetricsSource {
    async fn fetch_usage(&self) -> Result<Vec<PodUsage>, SourceError> {
        let api: Api<PodMetrics> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;

        let mut usage = Vec::with_capacity(list.items.len());
        for metrics in &list.items {
            match pod_usage_from_metrics(metrics) {
                Ok(sample) => usage.push(sample),
                Err(e) => warn!(
                    namespace = ?metrics.metadata.namespace,
                    pod = ?metrics.metadata.name,
                    error = %e,
                    "Skipping malformed pod metrics"
                ),
            }
        }

        debug!(pods = usage.len(), "Fetched pod usage");
        Ok(usage)
    }
}
