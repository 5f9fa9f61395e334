//! Rolling time-series storage
//!
//! One series per tracked entity (a namespace, or one of the reserved
//! keys below), each carrying a cpu and a mem channel at two retained
//! resolutions.
//!
//! Each entity has a single writer (the sampler loop) and any number of
//! readers. Writes replace the entity's file atomically, so readers only
//! ever observe a completed append and no locking is required.

mod rrd;

pub use rrd::{FileSeriesStore, RetentionPolicy, TierSpec};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Decimal places kept for every stored value
pub const ROUND_DECIMALS: i32 = 6;

/// Series holding the non-allocatable share of cluster capacity
pub const NON_ALLOCATABLE_KEY: &str = "non-allocatable";

/// Series holding the configured hourly billing rate
pub const BILLING_RATE_KEY: &str = ".billing-hourly-rate";

/// Round to [`ROUND_DECIMALS`] places
pub fn round_value(value: f64) -> f64 {
    let factor = 10f64.powi(ROUND_DECIMALS);
    (value * factor).round() / factor
}

/// One row returned by a range query; `None` marks an unknown value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: i64,
    pub cpu: Option<f64>,
    pub mem: Option<f64>,
}

/// Errors raised by a series store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no series stored for entity {0:?}")]
    NotFound(String),
    #[error("invalid entity key {0:?}")]
    InvalidKey(String),
    #[error("update of {entity:?} at {timestamp} is older than last update {last_update}")]
    StaleUpdate {
        entity: String,
        timestamp: i64,
        last_update: i64,
    },
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("corrupt series file {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Append-only store of per-entity series
pub trait SeriesStore: Send + Sync {
    /// Record one sample; an append at the last update time is a no-op
    fn append(&self, entity: &str, timestamp: i64, cpu: f64, mem: f64) -> Result<(), StoreError>;

    /// Samples in `(start, end]` at the retained resolution closest to
    /// `resolution` seconds, one per row, in time order
    fn range_query(
        &self,
        entity: &str,
        resolution: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<Sample>, StoreError>;

    /// Time of the first append to the entity
    fn creation_time(&self, entity: &str) -> Result<i64, StoreError>;

    /// Keys of all stored entities, sorted
    fn entities(&self) -> Result<Vec<String>, StoreError>;
}
