//! File-backed round-robin series store
//!
//! Every entity lives in `<root>/<entity>.json`. Appends are folded into
//! primary data points (PDP) of `step` seconds, then consolidated into one
//! or more retention tiers that keep a bounded number of rows each.

use super::{Sample, SeriesStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const FILE_EXTENSION: &str = "json";

/// Rows kept by one retention tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSpec {
    /// Primary data points consolidated into one row
    pub pdp_per_row: u32,
    /// Number of rows retained
    pub rows: usize,
}

/// Resolution and retention contract of every series
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    /// Primary data point length in seconds
    pub step: i64,
    /// Longest gap between appends still treated as known data
    pub heartbeat: i64,
    /// Largest fraction of unknown PDPs a consolidated row may contain
    pub xff: f64,
    pub tiers: Vec<TierSpec>,
}

impl RetentionPolicy {
    /// Policy for a given sampling interval: 4032 raw rows (14 days at
    /// 300 s) and 8880 rows of 12 PDPs (370 days at 300 s)
    pub fn for_step(step: i64) -> Self {
        Self {
            step,
            heartbeat: 2 * step,
            xff: 0.5,
            tiers: vec![
                TierSpec {
                    pdp_per_row: 1,
                    rows: 4032,
                },
                TierSpec {
                    pdp_per_row: 12,
                    rows: 8880,
                },
            ],
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::for_step(300)
    }
}

fn ceil_to(value: i64, step: i64) -> i64 {
    (value + step - 1).div_euclid(step) * step
}

fn floor_to(value: i64, step: i64) -> i64 {
    value.div_euclid(step) * step
}

/// Time-weighted sums of the PDP currently being filled
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct PdpAccumulator {
    known_secs: i64,
    cpu: f64,
    mem: f64,
}

/// Known PDPs of the row currently being filled
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct RowAccumulator {
    end: i64,
    known: u32,
    cpu: f64,
    mem: f64,
}

/// A consolidated row; only rows with known values are stored
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Row {
    end: i64,
    cpu: f64,
    mem: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tier {
    spec: TierSpec,
    pending: RowAccumulator,
    data: VecDeque<Row>,
}

impl Tier {
    fn new(spec: TierSpec) -> Self {
        Self {
            spec,
            pending: RowAccumulator::default(),
            data: VecDeque::new(),
        }
    }

    fn row_step(&self, step: i64) -> i64 {
        step * i64::from(self.spec.pdp_per_row)
    }

    fn push_pdp(&mut self, step: i64, xff: f64, end: i64, value: Option<(f64, f64)>) {
        let row_step = self.row_step(step);
        let row_end = ceil_to(end, row_step);

        if self.pending.end != row_end {
            self.flush(step, xff);
            self.pending.end = row_end;
        }

        if let Some((cpu, mem)) = value {
            self.pending.known += 1;
            self.pending.cpu += cpu;
            self.pending.mem += mem;
        }

        if end == row_end {
            self.flush(step, xff);
        }
    }

    fn flush(&mut self, step: i64, xff: f64) {
        let pending = std::mem::take(&mut self.pending);
        let required = f64::from(self.spec.pdp_per_row) * (1.0 - xff);
        if pending.end == 0 || pending.known == 0 || f64::from(pending.known) < required {
            return;
        }

        let known = f64::from(pending.known);
        self.data.push_back(Row {
            end: pending.end,
            cpu: pending.cpu / known,
            mem: pending.mem / known,
        });

        let horizon = pending.end - self.row_step(step) * self.spec.rows as i64;
        while self.data.front().is_some_and(|row| row.end <= horizon) {
            self.data.pop_front();
        }
    }

    fn lookup(&self, end: i64) -> Option<&Row> {
        self.data
            .binary_search_by_key(&end, |row| row.end)
            .ok()
            .and_then(|i| self.data.get(i))
    }
}

/// On-disk state of one entity
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SeriesFile {
    entity: String,
    created_at: i64,
    step: i64,
    heartbeat: i64,
    xff: f64,
    last_update: i64,
    pdp: PdpAccumulator,
    tiers: Vec<Tier>,
}

impl SeriesFile {
    fn new(entity: &str, created_at: i64, policy: &RetentionPolicy) -> Self {
        Self {
            entity: entity.to_string(),
            created_at,
            step: policy.step,
            heartbeat: policy.heartbeat,
            xff: policy.xff,
            last_update: created_at,
            pdp: PdpAccumulator::default(),
            tiers: policy.tiers.iter().copied().map(Tier::new).collect(),
        }
    }

    fn update(&mut self, timestamp: i64, cpu: f64, mem: f64) -> Result<(), StoreError> {
        if timestamp == self.last_update {
            return Ok(());
        }
        if timestamp < self.last_update {
            return Err(StoreError::StaleUpdate {
                entity: self.entity.clone(),
                timestamp,
                last_update: self.last_update,
            });
        }

        let step = self.step;

        if timestamp - self.last_update > self.heartbeat {
            // The gap is unknown: close the bucket holding the previous
            // update and start the current bucket empty.
            let boundary = floor_to(self.last_update, step) + step;
            if boundary <= timestamp {
                self.close_pdp(boundary);
            }
            self.pdp = PdpAccumulator::default();
            self.last_update = timestamp;
            return Ok(());
        }

        let mut cursor = self.last_update;
        while cursor < timestamp {
            let boundary = floor_to(cursor, step) + step;
            let segment_end = boundary.min(timestamp);
            let secs = segment_end - cursor;

            self.pdp.known_secs += secs;
            self.pdp.cpu += cpu * secs as f64;
            self.pdp.mem += mem * secs as f64;

            if segment_end == boundary {
                self.close_pdp(boundary);
            }
            cursor = segment_end;
        }

        self.last_update = timestamp;
        Ok(())
    }

    fn close_pdp(&mut self, end: i64) {
        let pdp = std::mem::take(&mut self.pdp);
        // A PDP needs at least half of its interval covered
        let value = (pdp.known_secs > 0 && pdp.known_secs * 2 >= self.step).then(|| {
            let secs = pdp.known_secs as f64;
            (pdp.cpu / secs, pdp.mem / secs)
        });

        for tier in &mut self.tiers {
            tier.push_pdp(self.step, self.xff, end, value);
        }
    }

    /// Pick the tier covering `start` with the row step closest to
    /// `resolution`, falling back to the tier reaching furthest back.
    fn select_tier(&self, resolution: i64, start: i64) -> Option<&Tier> {
        let coverage_start =
            |tier: &Tier| self.last_update - tier.row_step(self.step) * tier.spec.rows as i64;

        let covering = self
            .tiers
            .iter()
            .filter(|tier| coverage_start(tier) <= start)
            .min_by_key(|tier| (tier.row_step(self.step) - resolution).abs());

        covering.or_else(|| self.tiers.iter().min_by_key(|tier| coverage_start(tier)))
    }

    fn query(&self, resolution: i64, start: i64, end: i64) -> Vec<Sample> {
        let Some(tier) = self.select_tier(resolution, start) else {
            return Vec::new();
        };

        let row_step = tier.row_step(self.step);
        let first = floor_to(start, row_step) + row_step;
        let last = ceil_to(end, row_step);

        let mut samples = Vec::new();
        let mut ts = first;
        while ts <= last {
            let row = tier.lookup(ts);
            samples.push(Sample {
                timestamp: ts,
                cpu: row.map(|r| r.cpu),
                mem: row.map(|r| r.mem),
            });
            ts += row_step;
        }
        samples
    }
}

/// Series store keeping one JSON file per entity
#[derive(Debug, Clone)]
pub struct FileSeriesStore {
    root: PathBuf,
    policy: RetentionPolicy,
}

impl FileSeriesStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>, policy: RetentionPolicy) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root, policy })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    fn path_for(&self, entity: &str) -> Result<PathBuf, StoreError> {
        let invalid = entity.is_empty()
            || entity == "."
            || entity == ".."
            || entity.contains(['/', '\\', '\0']);
        if invalid {
            return Err(StoreError::InvalidKey(entity.to_string()));
        }
        Ok(self.root.join(format!("{}.{}", entity, FILE_EXTENSION)))
    }

    fn load(&self, entity: &str) -> Result<Option<SeriesFile>, StoreError> {
        let path = self.path_for(entity)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| StoreError::Corrupt { path, source })
    }

    fn load_existing(&self, entity: &str) -> Result<SeriesFile, StoreError> {
        self.load(entity)?
            .ok_or_else(|| StoreError::NotFound(entity.to_string()))
    }

    /// Write the file through a temp file and a rename
    fn save(&self, series: &SeriesFile) -> Result<(), StoreError> {
        let path = self.path_for(&series.entity)?;
        let temp_path = path.with_extension(format!("{}.tmp", FILE_EXTENSION));
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Io { path, source }
        };

        let json = serde_json::to_vec(series).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(io_err(&temp_path))?;
        file.write_all(&json).map_err(io_err(&temp_path))?;
        file.sync_all().map_err(io_err(&temp_path))?;

        fs::rename(&temp_path, &path).map_err(io_err(&path))
    }
}

impl SeriesStore for FileSeriesStore {
    fn append(&self, entity: &str, timestamp: i64, cpu: f64, mem: f64) -> Result<(), StoreError> {
        let mut series = match self.load(entity)? {
            Some(series) => series,
            None => {
                debug!(entity = %entity, "Creating series");
                SeriesFile::new(entity, timestamp, &self.policy)
            }
        };

        series.update(timestamp, cpu, mem)?;
        self.save(&series)
    }

    fn range_query(
        &self,
        entity: &str,
        resolution: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<Sample>, StoreError> {
        if end <= start {
            return Ok(Vec::new());
        }
        Ok(self.load_existing(entity)?.query(resolution, start, end))
    }

    fn creation_time(&self, entity: &str) -> Result<i64, StoreError> {
        Ok(self.load_existing(entity)?.created_at)
    }

    fn entities(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;

        let suffix = format!(".{}", FILE_EXTENSION);
        let mut entities = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, root = %self.root.display(), "Failed to read store entry");
                    continue;
                }
            };
            let name = entry.file_name();
            if let Some(entity) = name.to_str().and_then(|n| n.strip_suffix(&suffix)) {
                entities.push(entity.to_string());
            }
        }

        entities.sort();
        Ok(entities)
    }
}
