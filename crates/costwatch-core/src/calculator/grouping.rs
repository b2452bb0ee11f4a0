//! Aggregation of pods into workload groups

use crate::models::{Node, Pod, UsageSnapshot};
use crate::pricing::ResourceTotals;
use std::collections::{BTreeMap, HashMap};

/// Pods sharing a (namespace, deployment) key, with summed resources
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadGroup {
    pub namespace: String,
    /// `None` for the namespace-level group covering every pod of the namespace
    pub deployment: Option<String>,
    pub totals: ResourceTotals,
    pub pod_count: u32,
    /// Set when a member pod runs on a node with an unusable hourly rate
    pub invalid_node: Option<String>,
}

impl WorkloadGroup {
    fn new(namespace: &str, deployment: Option<&str>) -> Self {
        Self {
            namespace: namespace.to_string(),
            deployment: deployment.map(str::to_string),
            totals: ResourceTotals::default(),
            pod_count: 0,
            invalid_node: None,
        }
    }

    fn add(&mut self, pod: &Pod, latest: Option<&UsageSnapshot>, node: Option<&Node>) {
        self.totals.requested_cpu_cores += pod.cpu_request_cores;
        self.totals.requested_memory_gb += pod.memory_request_gb;
        // No snapshot yet counts as zero usage
        if let Some(snapshot) = latest {
            self.totals.actual_cpu_cores += snapshot.cpu_cores;
            self.totals.actual_memory_gb += snapshot.memory_gb;
        }
        self.pod_count = self.pod_count.saturating_add(1);

        if let Some(node) = node {
            let rate = node.hourly_rate;
            if self.invalid_node.is_none() && !(rate.is_finite() && rate >= 0.0) {
                self.invalid_node = Some(format!("node {} has hourly rate {rate}", node.id));
            }
        }
    }
}

/// Latest snapshots keyed by pod id
pub fn index_latest(snapshots: Vec<UsageSnapshot>) -> HashMap<String, UsageSnapshot> {
    snapshots
        .into_iter()
        .map(|s| (s.pod_id.clone(), s))
        .collect()
}

/// Group pods by (namespace, deployment) and by namespace alone.
///
/// Every namespace gets a `None` group over all its pods; pods with a
/// deployment also count towards their deployment's group. Groups come
/// back ordered by namespace, then deployment.
pub fn group_pods(
    pods: &[Pod],
    latest: &HashMap<String, UsageSnapshot>,
    nodes: &HashMap<String, Node>,
) -> Vec<WorkloadGroup> {
    let mut groups: BTreeMap<(String, Option<String>), WorkloadGroup> = BTreeMap::new();

    for pod in pods {
        let snapshot = latest.get(&pod.id);
        let node = pod.node_id.as_ref().and_then(|id| nodes.get(id));

        groups
            .entry((pod.namespace.clone(), None))
            .or_insert_with(|| WorkloadGroup::new(&pod.namespace, None))
            .add(pod, snapshot, node);

        if let Some(deployment) = pod.deployment.as_deref() {
            groups
                .entry((pod.namespace.clone(), Some(deployment.to_string())))
                .or_insert_with(|| WorkloadGroup::new(&pod.namespace, Some(deployment)))
                .add(pod, snapshot, node);
        }
    }

    groups.into_values().collect()
}
