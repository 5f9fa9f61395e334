//! Sampling cycle tests against canned cluster listings

use super::{ClientError, ClusterResource, ClusterSource, SamplerConfig, SamplerLoop, UsageSnapshotBuilder};
use crate::analytics::ArtifactPublisher;
use crate::collector::listing::{NamespaceList, NodeList, NodeMetricsList, PodList, PodMetricsList};
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{NodeCondition, SchedulingState};
use crate::observability::StructuredLogger;
use crate::store::{Sample, SeriesStore, StoreError, BILLING_RATE_KEY, NON_ALLOCATABLE_KEY};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const NAMESPACES: &str = r#"{"items": [
    {"metadata": {"name": "team-a"}},
    {"metadata": {"name": "team-b"}},
    {"metadata": {"name": "kube-system"}}
]}"#;

const NODES: &str = r#"{"items": [
    {
        "metadata": {"name": "node-a", "uid": "uid-node-a"},
        "status": {
            "capacity": {"cpu": "4", "memory": "16Gi"},
            "allocatable": {"cpu": "3500m", "memory": "15Gi"},
            "conditions": [
                {"type": "MemoryPressure", "status": "False", "message": "kubelet has sufficient memory"},
                {"type": "Ready", "status": "True", "message": "kubelet is posting ready status"}
            ],
            "nodeInfo": {"containerRuntimeVersion": "containerd://1.7.2"}
        }
    },
    {
        "metadata": {"name": "node-b", "uid": "uid-node-b"},
        "status": {
            "capacity": {"cpu": "4", "memory": "16Gi"},
            "allocatable": {"cpu": "4", "memory": "16Gi"},
            "conditions": [{"type": "Ready", "status": "True"}],
            "nodeInfo": {"containerRuntimeVersion": "containerd://1.7.2"}
        }
    }
]}"#;

const NODE_METRICS: &str = r#"{"items": [
    {"metadata": {"name": "node-a"}, "usage": {"cpu": "1500m", "memory": "6Gi"}},
    {"metadata": {"name": "node-b"}, "usage": {"cpu": "800m", "memory": "2Gi"}},
    {"metadata": {"name": "node-gone"}, "usage": {"cpu": "1", "memory": "1Gi"}}
]}"#;

const PODS: &str = r#"{"items": [
    {
        "metadata": {"name": "web-1", "namespace": "team-a", "uid": "uid-web-1"},
        "spec": {"nodeName": "node-a"},
        "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "True"}]}
    },
    {
        "metadata": {"name": "web-2", "namespace": "team-a", "uid": "uid-web-2"},
        "spec": {"nodeName": "node-b"},
        "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "True"}]}
    },
    {
        "metadata": {"name": "idle-0", "namespace": "team-a", "uid": "uid-idle-0"},
        "spec": {"nodeName": "node-b"},
        "status": {"phase": "Running", "conditions": [
            {"type": "Initialized", "status": "True"},
            {"type": "Ready", "status": "False"}
        ]}
    },
    {
        "metadata": {"name": "db-0", "namespace": "team-b", "uid": "uid-db-0"},
        "spec": {"nodeName": "node-a"},
        "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "True"}]}
    },
    {
        "metadata": {"name": "pending-0", "namespace": "team-b", "uid": "uid-pending-0"},
        "spec": {"nodeName": "node-b"},
        "status": {"phase": "Pending"}
    },
    {
        "metadata": {"name": "lost-0", "namespace": "team-b", "uid": "uid-lost-0"},
        "spec": {"nodeName": "node-x"},
        "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "True"}]}
    }
]}"#;

const POD_METRICS: &str = r#"{"items": [
    {
        "metadata": {"name": "web-1", "namespace": "team-a"},
        "containers": [
            {"name": "app", "usage": {"cpu": "250m", "memory": "512Mi"}},
            {"name": "sidecar", "usage": {"cpu": "250m", "memory": "512Mi"}}
        ]
    },
    {
        "metadata": {"name": "web-2", "namespace": "team-a"},
        "containers": [{"name": "app", "usage": {"cpu": "1", "memory": "1Gi"}}]
    },
    {
        "metadata": {"name": "db-0", "namespace": "team-b"},
        "containers": [{"name": "postgres", "usage": {"cpu": "2", "memory": "4Gi"}}]
    },
    {
        "metadata": {"name": "lost-0", "namespace": "team-b"},
        "containers": [{"name": "app", "usage": {"cpu": "1", "memory": "1Gi"}}]
    },
    {
        "metadata": {"name": "ghost-0", "namespace": "team-b"},
        "containers": [{"name": "app", "usage": {"cpu": "3", "memory": "3Gi"}}]
    }
]}"#;

/// Serves canned listings, failing the resources listed in `failing`
struct MockSource {
    failing: HashSet<ClusterResource>,
}

impl MockSource {
    fn healthy() -> Self {
        Self {
            failing: HashSet::new(),
        }
    }

    fn failing(resources: &[ClusterResource]) -> Self {
        Self {
            failing: resources.iter().copied().collect(),
        }
    }
}

#[async_trait]
impl ClusterSource for MockSource {
    async fn fetch(&self, resource: ClusterResource) -> Result<String, ClientError> {
        if self.failing.contains(&resource) {
            return Err(ClientError::Status {
                url: resource.path().to_string(),
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "metrics server unavailable".to_string(),
            });
        }
        let body = match resource {
            ClusterResource::Namespaces => NAMESPACES,
            ClusterResource::Nodes => NODES,
            ClusterResource::NodeMetrics => NODE_METRICS,
            ClusterResource::Pods => PODS,
            ClusterResource::PodMetrics => POD_METRICS,
        };
        Ok(body.to_string())
    }
}

/// Keeps the last appended values per entity
#[derive(Default)]
struct RecordingStore {
    appends: Mutex<HashMap<String, (i64, f64, f64)>>,
    rejected: HashSet<String>,
}

impl RecordingStore {
    fn rejecting(entity: &str) -> Self {
        Self {
            rejected: [entity.to_string()].into_iter().collect(),
            ..Default::default()
        }
    }

    fn get(&self, entity: &str) -> Option<(i64, f64, f64)> {
        self.appends.lock().unwrap().get(entity).copied()
    }

    fn len(&self) -> usize {
        self.appends.lock().unwrap().len()
    }
}

impl SeriesStore for RecordingStore {
    fn append(&self, entity: &str, timestamp: i64, cpu: f64, mem: f64) -> Result<(), StoreError> {
        if self.rejected.contains(entity) {
            return Err(StoreError::InvalidKey(entity.to_string()));
        }
        self.appends
            .lock()
            .unwrap()
            .insert(entity.to_string(), (timestamp, cpu, mem));
        Ok(())
    }

    fn range_query(&self, entity: &str, _: i64, _: i64, _: i64) -> Result<Vec<Sample>, StoreError> {
        Err(StoreError::NotFound(entity.to_string()))
    }

    fn creation_time(&self, entity: &str) -> Result<i64, StoreError> {
        Err(StoreError::NotFound(entity.to_string()))
    }

    fn entities(&self) -> Result<Vec<String>, StoreError> {
        let mut entities: Vec<String> = self.appends.lock().unwrap().keys().cloned().collect();
        entities.sort();
        Ok(entities)
    }
}

const NOW: i64 = 1_792_108_800;

struct Harness {
    _dir: TempDir,
    store: Arc<RecordingStore>,
    publisher: ArtifactPublisher,
    health: HealthRegistry,
    sampler: SamplerLoop,
}

fn harness(source: MockSource, store: RecordingStore, billing: Option<f64>) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(store);
    let publisher = ArtifactPublisher::new(dir.path().join("data")).unwrap();
    let health = HealthRegistry::new();
    let sampler = SamplerLoop::new(
        Arc::new(source),
        store.clone(),
        publisher.clone(),
        SamplerConfig {
            billing_hourly_rate: billing,
            ..Default::default()
        },
        health.clone(),
        StructuredLogger::new("test-cluster"),
    );
    Harness {
        _dir: dir,
        store,
        publisher,
        health,
        sampler,
    }
}

fn build(failing: &[ClusterResource]) -> crate::models::UsageSnapshot {
    let parse = |resource: ClusterResource, body: &str| -> Option<String> {
        (!failing.contains(&resource)).then(|| body.to_string())
    };
    let namespaces: Option<NamespaceList> =
        parse(ClusterResource::Namespaces, NAMESPACES).map(|b| serde_json::from_str(&b).unwrap());
    let nodes: Option<NodeList> =
        parse(ClusterResource::Nodes, NODES).map(|b| serde_json::from_str(&b).unwrap());
    let node_metrics: Option<NodeMetricsList> = parse(ClusterResource::NodeMetrics, NODE_METRICS)
        .map(|b| serde_json::from_str(&b).unwrap());
    let pods: Option<PodList> =
        parse(ClusterResource::Pods, PODS).map(|b| serde_json::from_str(&b).unwrap());
    let pod_metrics: Option<PodMetricsList> = parse(ClusterResource::PodMetrics, POD_METRICS)
        .map(|b| serde_json::from_str(&b).unwrap());

    let mut builder = UsageSnapshotBuilder::new();
    builder
        .ingest_namespaces(namespaces.as_ref())
        .ingest_nodes(nodes.as_ref())
        .ingest_node_metrics(node_metrics.as_ref())
        .ingest_pods(pods.as_ref())
        .ingest_pod_metrics(pod_metrics.as_ref());
    builder.consolidate()
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

#[test]
fn test_snapshot_nodes_and_pods() {
    let snapshot = build(&[]);

    let node_a = &snapshot.nodes["node-a"];
    assert_eq!(node_a.state, NodeCondition::Ready);
    assert_eq!(node_a.message, "kubelet is posting ready status");
    assert_eq!(node_a.cpu_allocatable, 3.5);
    assert_eq!(node_a.mem_capacity, 16e9);
    assert_eq!(node_a.cpu_usage, 1.5);
    assert_eq!(node_a.container_runtime, "containerd://1.7.2");

    let running: Vec<&str> = node_a.pods_running.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(running, vec!["db-0.team-b", "web-1.team-a"]);

    let node_b = &snapshot.nodes["node-b"];
    let not_running: Vec<&str> = node_b.pods_not_running.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(not_running, vec!["idle-0.team-a"]);

    let pending = &snapshot.pods["pending-0.team-b"];
    assert_eq!(pending.state, SchedulingState::PodNotScheduled);
    assert_eq!(pending.node_name, None);
    assert_eq!(snapshot.pods["idle-0.team-a"].state, SchedulingState::Initialized);
}

#[test]
fn test_namespace_usage_matches_pod_usage() {
    let snapshot = build(&[]);

    let team_a = snapshot.namespaces["team-a"];
    assert!(approx(team_a.cpu_usage, 1.5));
    assert!(approx(team_a.mem_usage, 2.024e9));
    assert!(approx(snapshot.namespaces["team-b"].cpu_usage, 2.0));
    assert_eq!(snapshot.namespaces["kube-system"].cpu_usage, 0.0);

    // only scheduled pods with metrics on a known node count
    let pod_cpu: f64 = snapshot
        .nodes
        .values()
        .flat_map(|node| node.pods_running.iter())
        .filter_map(|pod| pod.usage.map(|u| u.cpu_usage))
        .sum();
    let namespace_cpu: f64 = snapshot.namespaces.values().map(|ns| ns.cpu_usage).sum();
    assert!(approx(pod_cpu, namespace_cpu));
    assert!(approx(snapshot.cluster.cpu_used_by_pods, 3.5));

    assert_eq!(snapshot.cluster.cpu_capacity, 8.0);
    assert_eq!(snapshot.cluster.cpu_allocatable, 7.5);
    assert_eq!(snapshot.cluster.mem_allocatable, 31e9);
}

#[test]
fn test_snapshot_is_idempotent() {
    let first = serde_json::to_string(&build(&[])).unwrap();
    let second = serde_json::to_string(&build(&[])).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_cycle_appends_ratios() {
    let h = harness(MockSource::healthy(), RecordingStore::default(), Some(1.75));

    let summary = h.sampler.run_cycle(NOW).await;
    assert!(summary.failed_listings.is_empty());
    assert_eq!(summary.nodes, 2);
    assert_eq!(summary.pods, 6);
    // non-allocatable, billing rate and three namespaces
    assert_eq!(summary.appended, 5);

    let (ts, cpu, mem) = h.store.get(NON_ALLOCATABLE_KEY).unwrap();
    assert_eq!(ts, NOW);
    assert_eq!(cpu, 6.25);
    assert_eq!(mem, 3.125);

    assert_eq!(h.store.get(BILLING_RATE_KEY).unwrap(), (NOW, 1.75, 1.75));

    let (_, cpu, mem) = h.store.get("team-a").unwrap();
    assert_eq!(cpu, 18.75);
    assert!(approx(mem, 6.325));
    let (_, cpu, mem) = h.store.get("team-b").unwrap();
    assert_eq!(cpu, 25.0);
    assert_eq!(mem, 12.5);
    assert_eq!(h.store.get("kube-system").unwrap(), (NOW, 0.0, 0.0));

    let nodes: serde_json::Value =
        serde_json::from_slice(&std::fs::read(h.publisher.dir().join("nodes.json")).unwrap()).unwrap();
    assert_eq!(nodes["node-a"]["cpuCapacity"], 4.0);
    assert_eq!(nodes["node-a"]["podsRunning"][1]["cpuUsage"], 0.5);
    assert_eq!(nodes["node-b"]["podsNotRunning"][0]["name"], "idle-0.team-a");

    assert!(h.health.readiness().await.ready);
}

#[tokio::test]
async fn test_cycle_without_billing_rate() {
    let h = harness(MockSource::healthy(), RecordingStore::default(), None);
    h.sampler.run_cycle(NOW).await;

    assert!(h.store.get(BILLING_RATE_KEY).is_none());
    assert_eq!(h.store.len(), 4);
}

#[tokio::test]
async fn test_node_metrics_failure_keeps_capacity() {
    let h = harness(
        MockSource::failing(&[ClusterResource::NodeMetrics]),
        RecordingStore::default(),
        None,
    );

    let summary = h.sampler.run_cycle(NOW).await;
    assert_eq!(summary.failed_listings, vec!["node_metrics"]);

    let (_, cpu, _) = h.store.get(NON_ALLOCATABLE_KEY).unwrap();
    assert_eq!(cpu, 6.25);
    assert_eq!(h.store.get("team-b").unwrap().1, 25.0);

    let nodes: serde_json::Value =
        serde_json::from_slice(&std::fs::read(h.publisher.dir().join("nodes.json")).unwrap()).unwrap();
    assert_eq!(nodes["node-a"]["cpuUsage"], 0.0);
    assert_eq!(nodes["node-a"]["memAllocatable"], 15e9);

    let health = h.health.health().await;
    assert_eq!(
        health.components[components::CLUSTER_API].status,
        ComponentStatus::Degraded
    );
}

#[tokio::test]
async fn test_pod_metrics_failure_yields_zero_usage() {
    let h = harness(
        MockSource::failing(&[ClusterResource::PodMetrics]),
        RecordingStore::default(),
        None,
    );

    h.sampler.run_cycle(NOW).await;

    for namespace in ["team-a", "team-b", "kube-system"] {
        assert_eq!(h.store.get(namespace).unwrap(), (NOW, 0.0, 0.0));
    }
    let nodes: serde_json::Value =
        serde_json::from_slice(&std::fs::read(h.publisher.dir().join("nodes.json")).unwrap()).unwrap();
    assert_eq!(nodes["node-a"]["cpuCapacity"], 4.0);
    assert_eq!(nodes["node-b"]["podsNotRunning"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_no_nodes_skips_series() {
    let h = harness(
        MockSource::failing(&[ClusterResource::Nodes]),
        RecordingStore::default(),
        Some(2.0),
    );

    let summary = h.sampler.run_cycle(NOW).await;
    assert_eq!(summary.appended, 0);
    assert_eq!(h.store.len(), 0);

    let nodes = std::fs::read_to_string(h.publisher.dir().join("nodes.json")).unwrap();
    assert_eq!(nodes, "{}");
}

#[tokio::test]
async fn test_all_listings_failing() {
    let h = harness(
        MockSource::failing(&ClusterResource::ALL),
        RecordingStore::default(),
        None,
    );

    let summary = h.sampler.run_cycle(NOW).await;
    assert_eq!(summary.failed_listings.len(), 5);

    let health = h.health.health().await;
    assert_eq!(health.status, ComponentStatus::Unhealthy);
}

#[tokio::test]
async fn test_failed_append_does_not_abort_cycle() {
    let h = harness(MockSource::healthy(), RecordingStore::rejecting("team-a"), None);

    let summary = h.sampler.run_cycle(NOW).await;
    assert_eq!(summary.failed_appends, 1);
    assert_eq!(summary.appended, 3);
    assert!(h.store.get("team-b").is_some());
    assert!(h.store.get("kube-system").is_some());

    let health = h.health.health().await;
    assert_eq!(
        health.components[components::SERIES_STORE].status,
        ComponentStatus::Degraded
    );
}
