//! Observability infrastructure
//!
//! Provides:
//! - Prometheus gauges for hourly and periodic usage per entity
//! - Operational metrics for the sampler and exporter loops
//! - Structured JSON logging of lifecycle events with tracing

use crate::analytics::Period;
use crate::models::ResourceKind;
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter_vec, register_int_gauge,
    GaugeVec, Histogram, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for cycle durations (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<OpexMetricsInner> = OnceLock::new();

struct OpexMetricsInner {
    hourly_usage: GaugeVec,
    daily_usage: GaugeVec,
    monthly_usage: GaugeVec,
    sampler_cycle_seconds: Histogram,
    exporter_cycle_seconds: Histogram,
    poll_errors: IntCounterVec,
    store_errors: IntCounterVec,
    tracked_entities: IntGauge,
}

impl OpexMetricsInner {
    fn new() -> Self {
        Self {
            hourly_usage: register_gauge_vec!(
                "koa_namespace_hourly_usage",
                "Current hourly resource usage per namespace",
                &["namespace", "resource"]
            )
            .expect("Failed to register koa_namespace_hourly_usage"),

            daily_usage: register_gauge_vec!(
                "koa_namespace_daily_usage",
                "Current daily resource usage per namespace",
                &["namespace", "resource"]
            )
            .expect("Failed to register koa_namespace_daily_usage"),

            monthly_usage: register_gauge_vec!(
                "koa_namespace_monthly_usage",
                "Current monthly resource usage per namespace",
                &["namespace", "resource"]
            )
            .expect("Failed to register koa_namespace_monthly_usage"),

            sampler_cycle_seconds: register_histogram!(
                "koa_sampler_cycle_duration_seconds",
                "Time spent polling the cluster and appending samples",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register koa_sampler_cycle_duration_seconds"),

            exporter_cycle_seconds: register_histogram!(
                "koa_exporter_cycle_duration_seconds",
                "Time spent computing and publishing analytics",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register koa_exporter_cycle_duration_seconds"),

            poll_errors: register_int_counter_vec!(
                "koa_cluster_poll_errors_total",
                "Failed cluster API listings by resource",
                &["resource"]
            )
            .expect("Failed to register koa_cluster_poll_errors_total"),

            store_errors: register_int_counter_vec!(
                "koa_series_store_errors_total",
                "Failed series store operations",
                &["operation"]
            )
            .expect("Failed to register koa_series_store_errors_total"),

            tracked_entities: register_int_gauge!(
                "koa_tracked_entities",
                "Number of entities with a stored series"
            )
            .expect("Failed to register koa_tracked_entities"),
        }
    }
}

/// Handle to the process-wide metrics
///
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct OpexMetrics {
    _private: (),
}

impl Default for OpexMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OpexMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OpexMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OpexMetricsInner {
        GLOBAL_METRICS.get_or_init(OpexMetricsInner::new)
    }

    /// Usage of the bucket matching the current hour
    pub fn set_hourly_usage(&self, entity: &str, resource: ResourceKind, value: f64) {
        self.inner()
            .hourly_usage
            .with_label_values(&[entity, resource.label()])
            .set(value);
    }

    /// Cost of the current date group; only the 14-day and year periods
    /// have a gauge
    pub fn set_periodic_usage(
        &self,
        period: Period,
        entity: &str,
        resource: ResourceKind,
        value: f64,
    ) {
        let gauge = match period {
            Period::FourteenDays => &self.inner().daily_usage,
            Period::Year => &self.inner().monthly_usage,
            _ => return,
        };
        gauge.with_label_values(&[entity, resource.label()]).set(value);
    }

    pub fn observe_sampler_cycle(&self, elapsed: Duration) {
        self.inner()
            .sampler_cycle_seconds
            .observe(elapsed.as_secs_f64());
    }

    pub fn observe_exporter_cycle(&self, elapsed: Duration) {
        self.inner()
            .exporter_cycle_seconds
            .observe(elapsed.as_secs_f64());
    }

    pub fn inc_poll_errors(&self, resource: &str) {
        self.inner().poll_errors.with_label_values(&[resource]).inc();
    }

    pub fn inc_store_errors(&self, operation: &str) {
        self.inner()
            .store_errors
            .with_label_values(&[operation])
            .inc();
    }

    pub fn set_tracked_entities(&self, count: usize) {
        self.inner().tracked_entities.set(count as i64);
    }

    /// Current hourly gauge value, for tests and diagnostics
    pub fn hourly_usage(&self, entity: &str, resource: ResourceKind) -> f64 {
        self.inner()
            .hourly_usage
            .with_label_values(&[entity, resource.label()])
            .get()
    }

    /// Current periodic gauge value, `None` for periods without a gauge
    pub fn periodic_usage(&self, period: Period, entity: &str, resource: ResourceKind) -> Option<f64> {
        let gauge = match period {
            Period::FourteenDays => &self.inner().daily_usage,
            Period::Year => &self.inner().monthly_usage,
            _ => return None,
        };
        Some(gauge.with_label_values(&[entity, resource.label()]).get())
    }
}

/// Structured logger for lifecycle events
///
/// Every event carries a fixed `event` field and the cluster endpoint
/// the instance is attached to.
#[derive(Clone)]
pub struct StructuredLogger {
    cluster: String,
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    /// Log process startup
    pub fn log_startup(&self, version: &str, cost_model: &str, polling_interval: Duration) {
        info!(
            event = "agent_started",
            cluster = %self.cluster,
            agent_version = %version,
            cost_model = %cost_model,
            polling_interval_secs = polling_interval.as_secs(),
            "Opex analytics agent started"
        );
    }

    /// Log the outcome of one sampling cycle
    pub fn log_sample_cycle(
        &self,
        nodes: usize,
        pods: usize,
        namespaces: usize,
        failed_listings: &[&str],
        elapsed: Duration,
    ) {
        if failed_listings.is_empty() {
            info!(
                event = "sample_cycle",
                cluster = %self.cluster,
                nodes = nodes,
                pods = pods,
                namespaces = namespaces,
                elapsed_ms = elapsed.as_millis() as u64,
                "Sampling cycle complete"
            );
        } else {
            warn!(
                event = "sample_cycle",
                cluster = %self.cluster,
                nodes = nodes,
                pods = pods,
                namespaces = namespaces,
                failed_listings = ?failed_listings,
                elapsed_ms = elapsed.as_millis() as u64,
                "Sampling cycle complete with missing listings"
            );
        }
    }

    /// Log the outcome of one analytics cycle
    pub fn log_export_cycle(&self, entities: usize, artifacts: usize, elapsed: Duration) {
        info!(
            event = "export_cycle",
            cluster = %self.cluster,
            entities = entities,
            artifacts = artifacts,
            elapsed_ms = elapsed.as_millis() as u64,
            "Analytics cycle complete"
        );
    }

    /// Log process shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "Opex analytics agent shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_update() {
        let metrics = OpexMetrics::new();

        metrics.set_hourly_usage("metrics-test-ns", ResourceKind::Cpu, 12.5);
        assert_eq!(metrics.hourly_usage("metrics-test-ns", ResourceKind::Cpu), 12.5);

        metrics.set_periodic_usage(Period::Year, "metrics-test-ns", ResourceKind::Memory, 3.0);
        assert_eq!(
            metrics.periodic_usage(Period::Year, "metrics-test-ns", ResourceKind::Memory),
            Some(3.0)
        );

        // no gauge for the trend periods
        metrics.set_periodic_usage(Period::SevenDays, "metrics-test-ns", ResourceKind::Cpu, 1.0);
        assert_eq!(
            metrics.periodic_usage(Period::SevenDays, "metrics-test-ns", ResourceKind::Cpu),
            None
        );

        metrics.observe_sampler_cycle(Duration::from_millis(20));
        metrics.observe_exporter_cycle(Duration::from_millis(40));
        metrics.inc_poll_errors("nodes");
        metrics.inc_store_errors("append");
        metrics.set_tracked_entities(4);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("https://cluster.local");
        assert_eq!(logger.cluster, "https://cluster.local");
    }
}
