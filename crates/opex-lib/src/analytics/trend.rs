//! Trend series

use super::{utc, AnalyticsEngine, Period};
use crate::models::ResourceKind;
use crate::store::{round_value, StoreError, BILLING_RATE_KEY};
use serde::Serialize;
use tracing::{debug, warn};

/// One published trend sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub name: String,
    #[serde(rename = "dateUTC")]
    pub date_utc: String,
    pub usage: f64,
}

/// Trend samples per resource
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrendSeries {
    pub cpu: Vec<TrendPoint>,
    pub memory: Vec<TrendPoint>,
}

impl TrendSeries {
    pub fn points(&self, resource: ResourceKind) -> &[TrendPoint] {
        match resource {
            ResourceKind::Cpu => &self.cpu,
            ResourceKind::Memory => &self.memory,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cpu.is_empty() && self.memory.is_empty()
    }

    fn append(&mut self, other: TrendSeries) {
        self.cpu.extend(other.cpu);
        self.memory.extend(other.memory);
    }
}

/// Result of one query pass at a fixed resolution
struct TrendPass {
    series: TrendSeries,
    cpu_sum: f64,
    mem_sum: f64,
}

impl TrendPass {
    fn has_usage(&self) -> bool {
        self.cpu_sum > 0.0 && self.mem_sum > 0.0
    }
}

/// Stored percentage trimmed to the published precision
pub(super) fn trend_value(stored: f64) -> f64 {
    round_value(100.0 * stored) / 100.0
}

impl AnalyticsEngine {
    /// Trend series of every entity over `period` ending at `now`.
    ///
    /// Entities without stored data contribute nothing. The billing-rate
    /// series is skipped unless configured otherwise.
    pub fn trends(&self, entities: &[String], period: Period, now: i64) -> TrendSeries {
        let mut trends = TrendSeries::default();

        for entity in entities {
            if entity == BILLING_RATE_KEY && !self.config.include_billing_in_trends {
                continue;
            }

            match self.entity_trend(entity, period, now) {
                Ok(series) => trends.append(series),
                Err(StoreError::NotFound(_)) => {
                    debug!(entity = %entity, "No series stored yet");
                }
                Err(e) => {
                    self.metrics.inc_store_errors("range_query");
                    warn!(entity = %entity, error = %e, "Failed to read trend data");
                }
            }
        }

        trends
    }

    /// Trend of one entity at hourly resolution, retried once at five
    /// minute resolution when the hourly pass carries no usage
    pub fn entity_trend(
        &self,
        entity: &str,
        period: Period,
        now: i64,
    ) -> Result<TrendSeries, StoreError> {
        let hourly = self.trend_pass(entity, period, Period::OneHour, now)?;
        if hourly.has_usage() {
            return Ok(hourly.series);
        }

        debug!(entity = %entity, "No hourly usage, retrying at five minute resolution");
        let fine = self.trend_pass(entity, period, Period::FiveMinutes, now)?;
        if fine.has_usage() {
            return Ok(fine.series);
        }

        Ok(TrendSeries::default())
    }

    fn trend_pass(
        &self,
        entity: &str,
        period: Period,
        resolution: Period,
        now: i64,
    ) -> Result<TrendPass, StoreError> {
        let samples = self.store.range_query(
            entity,
            resolution.as_secs(),
            now - period.as_secs(),
            now,
        )?;

        let current_hour = now.div_euclid(Period::OneHour.as_secs()) * Period::OneHour.as_secs();
        let mut pass = TrendPass {
            series: TrendSeries::default(),
            cpu_sum: 0.0,
            mem_sum: 0.0,
        };

        for sample in samples {
            let (Some(cpu), Some(mem)) = (sample.cpu, sample.mem) else {
                continue;
            };
            let Some(time) = utc(sample.timestamp) else {
                continue;
            };

            let cpu = trend_value(cpu);
            let mem = trend_value(mem);
            let date_utc = time.format("%Y-%m-%dT%H:%M:%SZ").to_string();

            pass.series.cpu.push(TrendPoint {
                name: entity.to_string(),
                date_utc: date_utc.clone(),
                usage: cpu,
            });
            pass.series.memory.push(TrendPoint {
                name: entity.to_string(),
                date_utc,
                usage: mem,
            });
            pass.cpu_sum += cpu;
            pass.mem_sum += mem;

            if sample.timestamp == current_hour {
                self.metrics.set_hourly_usage(entity, ResourceKind::Cpu, cpu);
                self.metrics.set_hourly_usage(entity, ResourceKind::Memory, mem);
            }
        }

        Ok(pass)
    }
}
