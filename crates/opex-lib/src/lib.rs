//! Cluster usage and cost analytics
//!
//! This crate provides the core functionality for:
//! - Decoding cluster quantity strings
//! - Consolidating cluster listings into usage snapshots
//! - Recording usage ratios in a rolling series store
//! - Trend and cost histogram analytics under a selectable cost model
//! - Health checks and observability

pub mod analytics;
pub mod collector;
pub mod health;
pub mod models;
pub mod observability;
pub mod quantity;
pub mod store;

pub use analytics::{
    AnalyticsConfig, AnalyticsEngine, ArtifactPublisher, CostModel, ExporterConfig, ExporterLoop,
    Period,
};
pub use collector::{ClientConfig, ClusterResource, ClusterSource, K8sApiClient, SamplerConfig, SamplerLoop};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{OpexMetrics, StructuredLogger};
pub use store::{FileSeriesStore, RetentionPolicy, SeriesStore, StoreError};
