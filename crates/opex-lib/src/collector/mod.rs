//! Cluster usage collection
//!
//! Polls the cluster and metrics APIs, turns the raw listings into a usage
//! snapshot and records the derived ratios in the series store. A failed
//! listing only disables the ingestion step that depends on it.

mod client;
pub mod listing;
mod r#loop;
mod snapshot;

#[cfg(test)]
mod tests;

pub use client::{ClientConfig, ClientError, K8sApiClient, DEFAULT_REQUEST_TIMEOUT};
pub use r#loop::{SampleSummary, SamplerConfig, SamplerLoop};
pub use snapshot::{scan_conditions, UsageSnapshotBuilder};

pub use async_trait::async_trait;

/// Listings polled every sampling cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterResource {
    Namespaces,
    Nodes,
    NodeMetrics,
    Pods,
    PodMetrics,
}

impl ClusterResource {
    pub const ALL: [ClusterResource; 5] = [
        ClusterResource::Namespaces,
        ClusterResource::Nodes,
        ClusterResource::NodeMetrics,
        ClusterResource::Pods,
        ClusterResource::PodMetrics,
    ];

    /// API path relative to the cluster endpoint
    pub fn path(&self) -> &'static str {
        match self {
            ClusterResource::Namespaces => "/api/v1/namespaces",
            ClusterResource::Nodes => "/api/v1/nodes",
            ClusterResource::NodeMetrics => "/apis/metrics.k8s.io/v1beta1/nodes",
            ClusterResource::Pods => "/api/v1/pods",
            ClusterResource::PodMetrics => "/apis/metrics.k8s.io/v1beta1/pods",
        }
    }

    /// Short name used in logs and metric labels
    pub fn label(&self) -> &'static str {
        match self {
            ClusterResource::Namespaces => "namespaces",
            ClusterResource::Nodes => "nodes",
            ClusterResource::NodeMetrics => "node_metrics",
            ClusterResource::Pods => "pods",
            ClusterResource::PodMetrics => "pod_metrics",
        }
    }
}

/// Source of raw cluster listings
#[async_trait]
pub trait ClusterSource: Send + Sync {
    /// Fetch the raw JSON body of a listing
    async fn fetch(&self, resource: ClusterResource) -> Result<String, ClientError>;
}
