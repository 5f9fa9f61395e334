//! Usage snapshot construction
//!
//! Builds one consistent view of the cluster from the five raw listings.
//! Each ingestion step accepts `None` when its upstream fetch failed and
//! leaves the builder untouched in that case, so one failing resource type
//! never prevents the others from being recorded.

use super::listing::{
    Condition, NamespaceList, NodeList, NodeMetricsList, PodList, PodMetricsList,
};
use crate::models::{
    ClusterSnapshot, NamespaceUsage, NodeCondition, NodeState, PodState, ResourceUsage,
    SchedulingState, UsageSnapshot,
};
use crate::quantity::{cpu_or_zero, memory_or_zero};
use std::collections::BTreeMap;
use tracing::debug;

/// Scan conditions in status order and stop at the first true condition
/// whose type appears in `priority`.
///
/// Returns the resolved state and the last condition visited, which is the
/// matching condition or the trailing one when nothing matched.
pub fn scan_conditions<'a, S: Copy>(
    priority: &[(&str, S)],
    conditions: &'a [Condition],
) -> (Option<S>, Option<&'a Condition>) {
    let mut visited = None;
    for condition in conditions {
        visited = Some(condition);
        if !condition.is_true() {
            continue;
        }
        if let Some((_, state)) = priority.iter().find(|(kind, _)| condition.kind == *kind) {
            return (Some(*state), visited);
        }
    }
    (None, visited)
}

/// Accumulates the listings of one sampling cycle
#[derive(Debug, Default)]
pub struct UsageSnapshotBuilder {
    nodes: BTreeMap<String, NodeState>,
    pods: BTreeMap<String, PodState>,
    namespaces: BTreeMap<String, NamespaceUsage>,
}

impl UsageSnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a zero usage entry per namespace
    pub fn ingest_namespaces(&mut self, listing: Option<&NamespaceList>) -> &mut Self {
        let Some(listing) = listing else {
            return self;
        };

        for item in &listing.items {
            self.namespaces
                .insert(item.metadata.name.clone(), NamespaceUsage::default());
        }
        self
    }

    /// Build node states with capacity, allocatable and health condition
    pub fn ingest_nodes(&mut self, listing: Option<&NodeList>) -> &mut Self {
        let Some(listing) = listing else {
            return self;
        };

        for item in &listing.items {
            let status = &item.status;
            let quantity = |map: &BTreeMap<String, String>, key: &str| {
                map.get(key).map(String::as_str).unwrap_or_default().to_string()
            };

            let (state, visited) = scan_conditions(&NodeCondition::PRIORITY, &status.conditions);

            let node = NodeState {
                id: item.metadata.uid.clone(),
                name: item.metadata.name.clone(),
                state: state.unwrap_or(NodeCondition::Unknown),
                message: visited.and_then(|c| c.message.clone()).unwrap_or_default(),
                cpu_capacity: cpu_or_zero(&quantity(&status.capacity, "cpu")),
                cpu_allocatable: cpu_or_zero(&quantity(&status.allocatable, "cpu")),
                mem_capacity: memory_or_zero(&quantity(&status.capacity, "memory")),
                mem_allocatable: memory_or_zero(&quantity(&status.allocatable, "memory")),
                container_runtime: status.node_info.container_runtime_version.clone(),
                ..Default::default()
            };

            self.nodes.insert(node.name.clone(), node);
        }
        self
    }

    /// Overwrite node usage from the node metrics listing
    pub fn ingest_node_metrics(&mut self, listing: Option<&NodeMetricsList>) -> &mut Self {
        let Some(listing) = listing else {
            return self;
        };

        for item in &listing.items {
            match self.nodes.get_mut(&item.metadata.name) {
                Some(node) => {
                    node.cpu_usage = cpu_or_zero(&item.usage.cpu);
                    node.mem_usage = memory_or_zero(&item.usage.memory);
                }
                None => debug!(node = %item.metadata.name, "Dropping metrics for unknown node"),
            }
        }
        self
    }

    /// Build pod states keyed by `name.namespace`
    pub fn ingest_pods(&mut self, listing: Option<&PodList>) -> &mut Self {
        let Some(listing) = listing else {
            return self;
        };

        for item in &listing.items {
            let key = PodState::key(&item.metadata.name, &item.metadata.namespace);

            let state = match &item.status.conditions {
                None => {
                    debug!(
                        pod = %key,
                        namespace = %item.metadata.namespace,
                        phase = %item.status.phase,
                        "Pod has no conditions yet"
                    );
                    SchedulingState::PodNotScheduled
                }
                Some(conditions) => scan_conditions(&SchedulingState::PRIORITY, conditions)
                    .0
                    .unwrap_or(SchedulingState::PodNotScheduled),
            };

            let pod = PodState {
                id: item.metadata.uid.clone(),
                name: key.clone(),
                namespace: item.metadata.namespace.clone(),
                node_name: if state.is_scheduled() {
                    item.spec.node_name.clone()
                } else {
                    None
                },
                phase: item.status.phase.clone(),
                state,
                usage: None,
            };

            self.pods.insert(key, pod);
        }
        self
    }

    /// Sum container usage into the matching pod states
    pub fn ingest_pod_metrics(&mut self, listing: Option<&PodMetricsList>) -> &mut Self {
        let Some(listing) = listing else {
            return self;
        };

        for item in &listing.items {
            let key = PodState::key(&item.metadata.name, &item.metadata.namespace);
            let Some(pod) = self.pods.get_mut(&key) else {
                debug!(pod = %key, "Dropping metrics for unknown pod");
                continue;
            };

            let mut usage = ResourceUsage::default();
            for container in &item.containers {
                usage.add(&ResourceUsage {
                    cpu_usage: cpu_or_zero(&container.usage.cpu),
                    mem_usage: memory_or_zero(&container.usage.memory),
                });
            }
            pod.usage = Some(usage);
        }
        self
    }

    /// Aggregate pod usage into namespaces, nodes and cluster totals.
    ///
    /// A pod only counts when the node it is assigned to is known; pods
    /// without a resolvable node are skipped entirely. Capacity and
    /// allocatable totals come from a separate pass over the nodes.
    pub fn consolidate(self) -> UsageSnapshot {
        let Self {
            mut nodes,
            pods,
            mut namespaces,
        } = self;
        let mut cluster = ClusterSnapshot::default();

        for pod in pods.values() {
            let node = pod
                .node_name
                .as_deref()
                .and_then(|name| nodes.get_mut(name));
            let Some(node) = node else {
                debug!(pod = %pod.name, node = ?pod.node_name, "Skipping pod without a known node");
                continue;
            };

            match &pod.usage {
                Some(usage) => {
                    cluster.cpu_used_by_pods += usage.cpu_usage;
                    cluster.mem_used_by_pods += usage.mem_usage;
                    let ns = namespaces.entry(pod.namespace.clone()).or_default();
                    ns.cpu_usage += usage.cpu_usage;
                    ns.mem_usage += usage.mem_usage;
                    node.pods_running.push(pod.clone());
                }
                None => node.pods_not_running.push(pod.clone()),
            }
        }

        for node in nodes.values() {
            cluster.cpu_capacity += node.cpu_capacity;
            cluster.mem_capacity += node.mem_capacity;
            cluster.cpu_allocatable += node.cpu_allocatable;
            cluster.mem_allocatable += node.mem_allocatable;
        }

        UsageSnapshot {
            nodes,
            pods,
            namespaces,
            cluster,
        }
    }
}
