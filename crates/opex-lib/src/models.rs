//! Core data models for the usage snapshot

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resource channel tracked by every series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceKind {
    Cpu,
    Memory,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Cpu, ResourceKind::Memory];

    /// Label used for Prometheus gauges
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "CPU",
            ResourceKind::Memory => "MEMORY",
        }
    }

    /// Prefix of the published artifact files
    pub fn file_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
        }
    }
}

/// Node health condition, resolved in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeCondition {
    Ready,
    KernelDeadlock,
    NetworkUnavailable,
    OutOfDisk,
    MemoryPressure,
    DiskPressure,
    #[default]
    Unknown,
}

impl NodeCondition {
    /// Conditions in the order they are matched against a node's status
    pub const PRIORITY: [(&'static str, NodeCondition); 6] = [
        ("Ready", NodeCondition::Ready),
        ("KernelDeadlock", NodeCondition::KernelDeadlock),
        ("NetworkUnavailable", NodeCondition::NetworkUnavailable),
        ("OutOfDisk", NodeCondition::OutOfDisk),
        ("MemoryPressure", NodeCondition::MemoryPressure),
        ("DiskPressure", NodeCondition::DiskPressure),
    ];
}

/// Pod scheduling state, resolved in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SchedulingState {
    Ready,
    ContainersReady,
    PodScheduled,
    Initialized,
    #[default]
    PodNotScheduled,
}

impl SchedulingState {
    pub const PRIORITY: [(&'static str, SchedulingState); 4] = [
        ("Ready", SchedulingState::Ready),
        ("ContainersReady", SchedulingState::ContainersReady),
        ("PodScheduled", SchedulingState::PodScheduled),
        ("Initialized", SchedulingState::Initialized),
    ];

    pub fn is_scheduled(&self) -> bool {
        *self != SchedulingState::PodNotScheduled
    }
}

/// CPU (cores) and memory (bytes) pair
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub cpu_usage: f64,
    pub mem_usage: f64,
}

impl ResourceUsage {
    pub fn add(&mut self, other: &ResourceUsage) {
        self.cpu_usage += other.cpu_usage;
        self.mem_usage += other.mem_usage;
    }
}

/// Per-pod state for one sampling cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodState {
    pub id: String,
    /// `<pod name>.<namespace>`
    pub name: String,
    #[serde(skip)]
    pub namespace: String,
    pub node_name: Option<String>,
    pub phase: String,
    pub state: SchedulingState,
    /// Summed container usage, absent when no metrics were reported
    #[serde(flatten)]
    pub usage: Option<ResourceUsage>,
}

impl PodState {
    /// Composite key shared by the pod and pod-metrics listings
    pub fn key(name: &str, namespace: &str) -> String {
        format!("{}.{}", name, namespace)
    }
}

/// Per-node state for one sampling cycle
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    pub id: String,
    pub name: String,
    pub state: NodeCondition,
    pub message: String,
    pub cpu_capacity: f64,
    pub cpu_allocatable: f64,
    pub cpu_usage: f64,
    pub mem_capacity: f64,
    pub mem_allocatable: f64,
    pub mem_usage: f64,
    pub container_runtime: String,
    pub pods_running: Vec<PodState>,
    pub pods_not_running: Vec<PodState>,
}

/// Usage accumulated for one namespace during a cycle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceUsage {
    pub cpu_usage: f64,
    pub mem_usage: f64,
}

/// Cluster-wide totals
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    pub cpu_capacity: f64,
    pub mem_capacity: f64,
    pub cpu_allocatable: f64,
    pub mem_allocatable: f64,
    pub cpu_used_by_pods: f64,
    pub mem_used_by_pods: f64,
}

impl ClusterSnapshot {
    /// True when both capacities are positive, the precondition for ratios
    pub fn has_capacity(&self) -> bool {
        self.cpu_capacity > 0.0 && self.mem_capacity > 0.0
    }
}

/// Consolidated result of one sampling cycle
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UsageSnapshot {
    pub nodes: BTreeMap<String, NodeState>,
    pub pods: BTreeMap<String, PodState>,
    pub namespaces: BTreeMap<String, NamespaceUsage>,
    pub cluster: ClusterSnapshot,
}
