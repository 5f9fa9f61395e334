//! Cost histograms
//!
//! Hourly usage of every entity is summed per date group (day or month),
//! then each entity's share is priced by the configured cost model. The
//! billing-rate series never appears in the output; it only feeds the
//! Charge-Back model.

use super::trend::trend_value;
use super::{date_group, AnalyticsEngine, CostModel, Period};
use crate::models::ResourceKind;
use crate::store::{StoreError, BILLING_RATE_KEY};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Cost of one entity for one date group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostPoint {
    pub stack: String,
    pub usage: f64,
    pub date: String,
}

/// Cost points per resource
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostHistogram {
    pub cpu: Vec<CostPoint>,
    pub memory: Vec<CostPoint>,
}

impl CostHistogram {
    pub fn points(&self, resource: ResourceKind) -> &[CostPoint] {
        match resource {
            ResourceKind::Cpu => &self.cpu,
            ResourceKind::Memory => &self.memory,
        }
    }

    fn points_mut(&mut self, resource: ResourceKind) -> &mut Vec<CostPoint> {
        match resource {
            ResourceKind::Cpu => &mut self.cpu,
            ResourceKind::Memory => &mut self.memory,
        }
    }
}

/// Usage of all entities within one date group
#[derive(Debug, Default)]
struct DateBucket {
    first_seen: i64,
    usage: BTreeMap<String, f64>,
    /// Sum over every entity but the billing-rate series
    total: f64,
}

/// Date buckets of one resource
#[derive(Debug, Default)]
struct ResourceBuckets {
    dates: BTreeMap<String, DateBucket>,
}

impl ResourceBuckets {
    fn add(&mut self, date: &str, timestamp: i64, entity: &str, value: f64) {
        let bucket = self
            .dates
            .entry(date.to_string())
            .or_insert_with(|| DateBucket {
                first_seen: timestamp,
                ..Default::default()
            });
        bucket.first_seen = bucket.first_seen.min(timestamp);
        *bucket.usage.entry(entity.to_string()).or_insert(0.0) += value;
        if entity != BILLING_RATE_KEY {
            bucket.total += value;
        }
    }

    /// Buckets in calendar order
    fn chronological(&self) -> Vec<(&String, &DateBucket)> {
        let mut dates: Vec<_> = self.dates.iter().collect();
        dates.sort_by_key(|(_, bucket)| bucket.first_seen);
        dates
    }
}

/// Per date sums of one entity
#[derive(Debug, Default)]
struct EntityUsage {
    cpu: BTreeMap<String, (i64, f64)>,
    mem: BTreeMap<String, (i64, f64)>,
}

impl AnalyticsEngine {
    /// Cost histogram of every entity over `period` ending at `now`
    pub fn histogram(&self, entities: &[String], period: Period, now: i64) -> CostHistogram {
        let mut cpu = ResourceBuckets::default();
        let mut mem = ResourceBuckets::default();

        for entity in entities {
            let usage = match self.entity_usage_by_date(entity, period, now) {
                Ok(usage) => usage,
                Err(StoreError::NotFound(_)) => {
                    debug!(entity = %entity, "No series stored yet");
                    continue;
                }
                Err(e) => {
                    self.metrics.inc_store_errors("range_query");
                    warn!(entity = %entity, error = %e, "Failed to read histogram data");
                    continue;
                }
            };

            // Only dates with actual usage take part in the totals
            for (date, (first_seen, value)) in usage.cpu.iter().filter(|(_, (_, v))| *v > 0.0) {
                cpu.add(date, *first_seen, entity, *value);
            }
            for (date, (first_seen, value)) in usage.mem.iter().filter(|(_, (_, v))| *v > 0.0) {
                mem.add(date, *first_seen, entity, *value);
            }
        }

        let current_group = date_group(now, period);
        let mut histogram = CostHistogram::default();
        for (resource, buckets) in [(ResourceKind::Cpu, &cpu), (ResourceKind::Memory, &mem)] {
            let points = self.price(resource, buckets, period, current_group.as_deref());
            *histogram.points_mut(resource) = points;
        }
        histogram
    }

    fn price(
        &self,
        resource: ResourceKind,
        buckets: &ResourceBuckets,
        period: Period,
        current_group: Option<&str>,
    ) -> Vec<CostPoint> {
        let model = self.config.cost_model;
        let mut points = Vec::new();

        for (date, bucket) in buckets.chronological() {
            let billed = bucket.usage.get(BILLING_RATE_KEY).copied();
            if model == CostModel::ChargeBack && billed.is_none() {
                warn!(
                    date = %date,
                    resource = resource.label(),
                    "No billing data for date, skipping charge-back"
                );
                continue;
            }

            for (entity, usage) in &bucket.usage {
                if entity == BILLING_RATE_KEY {
                    continue;
                }
                let Some(cost) = model.cost(*usage, bucket.total, billed) else {
                    continue;
                };

                if current_group == Some(date.as_str()) {
                    self.metrics.set_periodic_usage(period, entity, resource, cost);
                }

                points.push(CostPoint {
                    stack: entity.clone(),
                    usage: cost,
                    date: date.clone(),
                });
            }
        }

        points
    }

    fn entity_usage_by_date(
        &self,
        entity: &str,
        period: Period,
        now: i64,
    ) -> Result<EntityUsage, StoreError> {
        let samples = self.store.range_query(
            entity,
            Period::OneHour.as_secs(),
            now - period.as_secs(),
            now,
        )?;

        let mut usage = EntityUsage::default();
        for sample in samples {
            let (Some(cpu), Some(mem)) = (sample.cpu, sample.mem) else {
                continue;
            };
            let Some(date) = date_group(sample.timestamp, period) else {
                continue;
            };

            let slot = usage.cpu.entry(date.clone()).or_insert((sample.timestamp, 0.0));
            slot.1 += trend_value(cpu);
            let slot = usage.mem.entry(date).or_insert((sample.timestamp, 0.0));
            slot.1 += trend_value(mem);
        }

        Ok(usage)
    }
}
