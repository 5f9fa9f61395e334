//! Wire models for the cluster API listings
//!
//! Only the fields read by the snapshot builder are modeled. Every field
//! defaults when absent so a partially populated object never rejects the
//! whole listing.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Generic `{"items": [...]}` envelope
#[derive(Debug, Clone, Deserialize)]
pub struct Listing<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub message: Option<String>,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NamespaceItem {
    pub metadata: ObjectMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeItem {
    pub metadata: ObjectMeta,
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeStatus {
    pub capacity: BTreeMap<String, String>,
    pub allocatable: BTreeMap<String, String>,
    pub conditions: Vec<Condition>,
    pub node_info: NodeInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeInfo {
    pub container_runtime_version: String,
}

/// `cpu`/`memory` quantity strings as reported by the metrics API
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UsageQuantities {
    pub cpu: String,
    pub memory: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeMetricsItem {
    pub metadata: ObjectMeta,
    pub usage: UsageQuantities,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PodItem {
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
    pub status: PodStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PodSpec {
    pub node_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PodStatus {
    pub phase: String,
    /// `None` when the pod has not reported any condition yet
    pub conditions: Option<Vec<Condition>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PodMetricsItem {
    pub metadata: ObjectMeta,
    pub containers: Vec<ContainerMetricsItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContainerMetricsItem {
    pub name: String,
    pub usage: UsageQuantities,
}

pub type NamespaceList = Listing<NamespaceItem>;
pub type NodeList = Listing<NodeItem>;
pub type NodeMetricsList = Listing<NodeMetricsItem>;
pub type PodList = Listing<PodItem>;
pub type PodMetricsList = Listing<PodMetricsItem>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_listing() {
        let json = r#"{
            "kind": "NodeList",
            "items": [{
                "metadata": {"name": "node-1", "uid": "abc"},
                "status": {
                    "capacity": {"cpu": "4", "memory": "16Gi", "pods": "110"},
                    "allocatable": {"cpu": "3800m", "memory": "15Gi"},
                    "conditions": [{"type": "Ready", "status": "True", "message": "kubelet is posting ready status"}],
                    "nodeInfo": {"containerRuntimeVersion": "containerd://1.7.2"}
                }
            }]
        }"#;

        let listing: NodeList = serde_json::from_str(json).unwrap();
        assert_eq!(listing.items.len(), 1);
        let node = &listing.items[0];
        assert_eq!(node.metadata.name, "node-1");
        assert_eq!(node.status.capacity["memory"], "16Gi");
        assert_eq!(node.status.node_info.container_runtime_version, "containerd://1.7.2");
        assert!(node.status.conditions[0].is_true());
    }

    #[test]
    fn test_parse_pod_without_conditions() {
        let json = r#"{"items": [{"metadata": {"name": "p", "namespace": "ns"}, "status": {"phase": "Pending"}}]}"#;
        let listing: PodList = serde_json::from_str(json).unwrap();
        assert!(listing.items[0].status.conditions.is_none());
        assert!(listing.items[0].spec.node_name.is_none());
    }

    #[test]
    fn test_parse_missing_items() {
        let listing: NamespaceList = serde_json::from_str("{}").unwrap();
        assert!(listing.items.is_empty());
    }
}
