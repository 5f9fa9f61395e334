//! Analytics over the stored series
//!
//! Replays every tracked entity into two products:
//! - trend series: recent usage per entity at hourly (or finer) resolution
//! - cost histograms: usage summed per calendar date group, converted into
//!   cost figures by the configured [`CostModel`]

mod cost;
mod exporter;
mod histogram;
mod trend;

pub use cost::{CostModel, UnknownCostModel};
pub use exporter::{
    ArtifactPublisher, ExportSummary, ExporterConfig, ExporterLoop, BACKEND_ARTIFACT, NODES_ARTIFACT,
};
pub use histogram::{CostHistogram, CostPoint};
pub use trend::{TrendPoint, TrendSeries};

use crate::observability::OpexMetrics;
use crate::store::SeriesStore;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

/// Analysis windows and resolutions, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    FiveMinutes,
    OneHour,
    OneDay,
    SevenDays,
    FourteenDays,
    /// 370 days, the retention of the hourly tier
    Year,
}

impl Period {
    pub fn as_secs(&self) -> i64 {
        match self {
            Period::FiveMinutes => 300,
            Period::OneHour => 3_600,
            Period::OneDay => 86_400,
            Period::SevenDays => 604_800,
            Period::FourteenDays => 1_209_600,
            Period::Year => 31_968_000,
        }
    }
}

/// Window of the published trend series
pub const TREND_PERIOD: Period = Period::SevenDays;

/// Periods published as cost histograms
pub const HISTOGRAM_PERIODS: [Period; 2] = [Period::FourteenDays, Period::Year];

pub(crate) fn utc(timestamp: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(timestamp, 0).single()
}

/// Histogram bucket label of a timestamp.
///
/// The year period groups by month (`Oct 2026`); every other period by
/// day (`16 Oct`).
pub fn date_group(timestamp: i64, period: Period) -> Option<String> {
    let time = utc(timestamp)?;
    let format = match period {
        Period::Year => "%b %Y",
        _ => "%d %b",
    };
    Some(time.format(format).to_string())
}

/// Settings of the analytics engine
#[derive(Debug, Clone, Default)]
pub struct AnalyticsConfig {
    pub cost_model: CostModel,
    /// Publish the billing-rate series alongside namespace trends
    pub include_billing_in_trends: bool,
}

/// Computes trends and cost histograms from a series store
#[derive(Clone)]
pub struct AnalyticsEngine {
    store: Arc<dyn SeriesStore>,
    config: AnalyticsConfig,
    metrics: OpexMetrics,
}

impl AnalyticsEngine {
    pub fn new(store: Arc<dyn SeriesStore>, config: AnalyticsConfig, metrics: OpexMetrics) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }
}
