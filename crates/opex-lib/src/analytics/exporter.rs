//! Analytics export loop
//!
//! Periodically replays the series store through the analytics engine and
//! publishes the results as JSON artifacts for the frontend.

use super::{AnalyticsEngine, CostModel, HISTOGRAM_PERIODS, TREND_PERIOD};
use crate::health::{components, HealthRegistry};
use crate::models::ResourceKind;
use crate::observability::{OpexMetrics, StructuredLogger};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Snapshot of nodes and their pods, rewritten every sampling cycle
pub const NODES_ARTIFACT: &str = "nodes.json";

/// Cost model description for the frontend
pub const BACKEND_ARTIFACT: &str = "backend.json";

fn trends_artifact(resource: ResourceKind) -> String {
    format!("{}_usage_trends.json", resource.file_prefix())
}

fn histogram_artifact(resource: ResourceKind, period_secs: i64) -> String {
    format!("{}_usage_period_{}.json", resource.file_prefix(), period_secs)
}

#[derive(Debug, Serialize)]
struct BackendInfo<'a> {
    cost_model: &'a str,
    currency: &'a str,
}

/// Writes JSON artifacts into the published data directory
#[derive(Debug, Clone)]
pub struct ArtifactPublisher {
    dir: PathBuf,
}

impl ArtifactPublisher {
    /// Create the publisher, creating `dir` if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create artifact directory {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Serialize `value` into `<dir>/<name>` through a temp file and a rename
    pub fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            bail!("Invalid artifact name {:?}", name);
        }

        let path = self.dir.join(name);
        let temp_path = self.dir.join(format!(".{}.tmp", name));
        let json = serde_json::to_vec(value).context("Failed to serialize artifact")?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to open {:?}", temp_path))?;
        file.write_all(&json)
            .with_context(|| format!("Failed to write {:?}", temp_path))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync {:?}", temp_path))?;

        fs::rename(&temp_path, &path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

        debug!(artifact = %name, bytes = json.len(), "Published artifact");
        Ok(())
    }

    /// Publish the cost model label and the unit of the cost figures
    pub fn write_backend_info(&self, cost_model: CostModel, currency: &str) -> Result<()> {
        let info = BackendInfo {
            cost_model: cost_model.label(),
            currency: cost_model.unit(currency),
        };
        self.write_json(BACKEND_ARTIFACT, &info)
    }
}

/// Configuration for the export loop
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub interval: Duration,
}

impl ExporterConfig {
    /// Export every one and a half sampling intervals
    pub fn from_polling_interval(polling: Duration) -> Self {
        let secs = (1.5 * polling.as_secs_f64()).round().max(1.0);
        Self {
            interval: Duration::from_secs(secs as u64),
        }
    }
}

/// Outcome of one export cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub entities: usize,
    pub artifacts: usize,
    pub failed_artifacts: usize,
}

/// Loop publishing trends and cost histograms
pub struct ExporterLoop {
    engine: AnalyticsEngine,
    publisher: ArtifactPublisher,
    config: ExporterConfig,
    health: HealthRegistry,
    metrics: OpexMetrics,
    logger: StructuredLogger,
}

impl ExporterLoop {
    pub fn new(
        engine: AnalyticsEngine,
        publisher: ArtifactPublisher,
        config: ExporterConfig,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            metrics: engine.metrics.clone(),
            engine,
            publisher,
            config,
            health,
            logger,
        }
    }

    /// Run export cycles until a shutdown signal is received
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            cost_model = %self.engine.config.cost_model,
            "Starting analytics export loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    if let Err(e) = self.run_cycle(now).await {
                        warn!(error = %e, "Analytics export cycle failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down analytics export loop");
                    break;
                }
            }
        }
    }

    /// Compute and publish every artifact for the given time
    pub async fn run_cycle(&self, now: i64) -> Result<ExportSummary> {
        let start = Instant::now();

        let entities = match self.engine.store.entities() {
            Ok(entities) => entities,
            Err(e) => {
                self.metrics.inc_store_errors("entities");
                self.health
                    .set_unhealthy(components::SERIES_STORE, e.to_string())
                    .await;
                return Err(e).context("Failed to list stored entities");
            }
        };
        self.health.set_healthy(components::SERIES_STORE).await;
        self.metrics.set_tracked_entities(entities.len());

        let mut summary = ExportSummary {
            entities: entities.len(),
            ..Default::default()
        };

        let trends = self.engine.trends(&entities, TREND_PERIOD, now);
        for resource in ResourceKind::ALL {
            self.publish(&trends_artifact(resource), trends.points(resource), &mut summary);
        }

        for period in HISTOGRAM_PERIODS {
            let histogram = self.engine.histogram(&entities, period, now);
            for resource in ResourceKind::ALL {
                let name = histogram_artifact(resource, period.as_secs());
                self.publish(&name, histogram.points(resource), &mut summary);
            }
        }

        if summary.failed_artifacts > 0 {
            self.health
                .set_degraded(
                    components::EXPORTER,
                    format!("{} artifacts failed to publish", summary.failed_artifacts),
                )
                .await;
        } else {
            self.health.set_healthy(components::EXPORTER).await;
        }

        let elapsed = start.elapsed();
        self.metrics.observe_exporter_cycle(elapsed);
        self.logger
            .log_export_cycle(summary.entities, summary.artifacts, elapsed);

        Ok(summary)
    }

    fn publish<T: Serialize + ?Sized>(&self, name: &str, value: &T, summary: &mut ExportSummary) {
        match self.publisher.write_json(name, value) {
            Ok(()) => summary.artifacts += 1,
            Err(e) => {
                summary.failed_artifacts += 1;
                self.metrics.inc_store_errors("publish");
                warn!(artifact = %name, error = %e, "Failed to publish artifact");
            }
        }
    }
}
