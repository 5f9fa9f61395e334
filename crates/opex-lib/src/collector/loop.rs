//! Sampling loop
//!
//! Every cycle polls the five cluster listings, consolidates them into a
//! usage snapshot, publishes the node snapshot and appends the derived
//! usage ratios to the series store.

use super::listing::{NamespaceList, NodeList, NodeMetricsList, PodList, PodMetricsList};
use super::{ClusterResource, ClusterSource, UsageSnapshotBuilder};
use crate::analytics::{ArtifactPublisher, NODES_ARTIFACT};
use crate::health::{components, HealthRegistry};
use crate::models::UsageSnapshot;
use crate::observability::{OpexMetrics, StructuredLogger};
use crate::store::{round_value, SeriesStore, BILLING_RATE_KEY, NON_ALLOCATABLE_KEY};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the sampling loop
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Polling interval, also the step of the stored series
    pub interval: Duration,
    /// Hourly cluster cost recorded under the billing-rate series
    pub billing_hourly_rate: Option<f64>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            billing_hourly_rate: None,
        }
    }
}

/// Outcome of one sampling cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSummary {
    pub nodes: usize,
    pub pods: usize,
    pub namespaces: usize,
    pub failed_listings: Vec<&'static str>,
    /// Entities written to the series store
    pub appended: usize,
    pub failed_appends: usize,
}

/// Percentage of `value` over `total`
fn usage_ratio(value: f64, total: f64) -> f64 {
    round_value(100.0 * value / total)
}

/// Loop polling the cluster and feeding the series store
pub struct SamplerLoop {
    source: Arc<dyn ClusterSource>,
    store: Arc<dyn SeriesStore>,
    publisher: ArtifactPublisher,
    config: SamplerConfig,
    health: HealthRegistry,
    metrics: OpexMetrics,
    logger: StructuredLogger,
}

impl SamplerLoop {
    pub fn new(
        source: Arc<dyn ClusterSource>,
        store: Arc<dyn SeriesStore>,
        publisher: ArtifactPublisher,
        config: SamplerConfig,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            source,
            store,
            publisher,
            config,
            health,
            metrics: OpexMetrics::new(),
            logger,
        }
    }

    /// Run sampling cycles until a shutdown signal is received
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            billing_rate = ?self.config.billing_hourly_rate,
            "Starting sampling loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    self.run_cycle(now).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down sampling loop");
                    break;
                }
            }
        }
    }

    /// Poll, consolidate and record one sample at `now`
    pub async fn run_cycle(&self, now: i64) -> SampleSummary {
        let start = Instant::now();

        let (namespaces, nodes, node_metrics, pods, pod_metrics) = tokio::join!(
            self.fetch_listing::<NamespaceList>(ClusterResource::Namespaces),
            self.fetch_listing::<NodeList>(ClusterResource::Nodes),
            self.fetch_listing::<NodeMetricsList>(ClusterResource::NodeMetrics),
            self.fetch_listing::<PodList>(ClusterResource::Pods),
            self.fetch_listing::<PodMetricsList>(ClusterResource::PodMetrics),
        );
        let failed_listings = [
            (ClusterResource::Namespaces, namespaces.is_none()),
            (ClusterResource::Nodes, nodes.is_none()),
            (ClusterResource::NodeMetrics, node_metrics.is_none()),
            (ClusterResource::Pods, pods.is_none()),
            (ClusterResource::PodMetrics, pod_metrics.is_none()),
        ]
        .into_iter()
        .filter(|(_, missing)| *missing)
        .map(|(resource, _)| resource.label())
        .collect();

        let mut builder = UsageSnapshotBuilder::new();
        builder
            .ingest_namespaces(namespaces.as_ref())
            .ingest_nodes(nodes.as_ref())
            .ingest_node_metrics(node_metrics.as_ref())
            .ingest_pods(pods.as_ref())
            .ingest_pod_metrics(pod_metrics.as_ref());
        let snapshot = builder.consolidate();

        if let Err(e) = self.publisher.write_json(NODES_ARTIFACT, &snapshot.nodes) {
            self.metrics.inc_store_errors("publish");
            warn!(artifact = NODES_ARTIFACT, error = %e, "Failed to publish node snapshot");
        }

        let mut summary = SampleSummary {
            nodes: snapshot.nodes.len(),
            pods: snapshot.pods.len(),
            namespaces: snapshot.namespaces.len(),
            failed_listings,
            ..Default::default()
        };

        if snapshot.cluster.has_capacity() {
            self.record(&snapshot, now, &mut summary);
        } else {
            debug!("No cluster capacity reported, skipping series update");
        }

        self.report_health(&summary).await;

        let elapsed = start.elapsed();
        self.metrics.observe_sampler_cycle(elapsed);
        self.logger.log_sample_cycle(
            summary.nodes,
            summary.pods,
            summary.namespaces,
            &summary.failed_listings,
            elapsed,
        );

        summary
    }

    /// Fetch and decode one listing; any failure yields `None`
    async fn fetch_listing<T: DeserializeOwned>(&self, resource: ClusterResource) -> Option<T> {
        let decoded = match self.source.fetch(resource).await {
            Ok(body) => serde_json::from_str::<T>(&body).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match decoded {
            Ok(listing) => Some(listing),
            Err(error) => {
                self.metrics.inc_poll_errors(resource.label());
                warn!(resource = resource.label(), error = %error, "Cluster listing unavailable");
                None
            }
        }
    }

    /// Append the non-allocatable share, the billing rate and every
    /// namespace's share of cluster capacity
    fn record(&self, snapshot: &UsageSnapshot, now: i64, summary: &mut SampleSummary) {
        let cluster = &snapshot.cluster;

        self.append(
            NON_ALLOCATABLE_KEY,
            now,
            usage_ratio(cluster.cpu_capacity - cluster.cpu_allocatable, cluster.cpu_capacity),
            usage_ratio(cluster.mem_capacity - cluster.mem_allocatable, cluster.mem_capacity),
            summary,
        );

        if let Some(rate) = self.config.billing_hourly_rate {
            self.append(BILLING_RATE_KEY, now, rate, rate, summary);
        }

        for (namespace, usage) in &snapshot.namespaces {
            self.append(
                namespace,
                now,
                usage_ratio(usage.cpu_usage, cluster.cpu_capacity),
                usage_ratio(usage.mem_usage, cluster.mem_capacity),
                summary,
            );
        }
    }

    fn append(&self, entity: &str, now: i64, cpu: f64, mem: f64, summary: &mut SampleSummary) {
        match self.store.append(entity, now, cpu, mem) {
            Ok(()) => summary.appended += 1,
            Err(e) => {
                summary.failed_appends += 1;
                self.metrics.inc_store_errors("append");
                warn!(entity = %entity, error = %e, "Failed to append sample");
            }
        }
    }

    async fn report_health(&self, summary: &SampleSummary) {
        match summary.failed_listings.len() {
            0 => self.health.set_healthy(components::CLUSTER_API).await,
            n if n == ClusterResource::ALL.len() => {
                self.health
                    .set_unhealthy(components::CLUSTER_API, "All cluster listings failed")
                    .await
            }
            _ => {
                self.health
                    .set_degraded(
                        components::CLUSTER_API,
                        format!("Unavailable listings: {}", summary.failed_listings.join(", ")),
                    )
                    .await
            }
        }

        if summary.failed_appends > 0 {
            self.health
                .set_degraded(
                    components::SERIES_STORE,
                    format!("{} appends failed", summary.failed_appends),
                )
                .await;
        } else {
            self.health.set_healthy(components::SERIES_STORE).await;
        }

        self.health.set_healthy(components::SAMPLER).await;
        self.health.set_ready(true).await;
    }
}
