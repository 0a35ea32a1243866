//! Disk usage accounting shared by the value cache, file cache and archive.
//!
//! Counters are recomputed from disk when a connector starts and kept current
//! afterwards through deltas applied by whichever cache wrote, moved or
//! removed a file. The backpressure ceiling reads the sum.

use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use super::fs::{dir_size, ARCHIVE_FOLDER, FILE_ERROR_FOLDER, FILE_FOLDER, VALUE_ERROR_FOLDER, VALUE_FOLDER};
use crate::backpressure::BackpressureLevel;

/// Which folder group a byte count belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheArea {
    /// `values/` and `files/`
    Cache,
    /// `values-errors/` and `files-errors/`
    Error,
    /// `archive/`
    Archive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub cache_size: u64,
    pub error_size: u64,
    pub archive_size: u64,
}

impl UsageSnapshot {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.cache_size + self.error_size + self.archive_size
    }
}

#[derive(Debug, Default)]
pub struct CacheUsage {
    cache: AtomicU64,
    error: AtomicU64,
    archive: AtomicU64,
}

impl CacheUsage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, area: CacheArea) -> &AtomicU64 {
        match area {
            CacheArea::Cache => &self.cache,
            CacheArea::Error => &self.error,
            CacheArea::Archive => &self.archive,
        }
    }

    pub fn add(&self, area: CacheArea, bytes: u64) {
        self.counter(area).fetch_add(bytes, Ordering::AcqRel);
    }

    /// Subtract, clamping at zero (files may have been changed behind our back)
    pub fn sub(&self, area: CacheArea, bytes: u64) {
        let _ = self
            .counter(area)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(v.saturating_sub(bytes)));
    }

    /// Account for a file moving from one folder group to another.
    pub fn transfer(&self, from: CacheArea, to: CacheArea, bytes: u64) {
        self.sub(from, bytes);
        self.add(to, bytes);
    }

    pub fn set(&self, area: CacheArea, bytes: u64) {
        self.counter(area).store(bytes, Ordering::Release);
    }

    #[must_use]
    pub fn get(&self, area: CacheArea) -> u64 {
        self.counter(area).load(Ordering::Acquire)
    }

    #[must_use]
    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            cache_size: self.get(CacheArea::Cache),
            error_size: self.get(CacheArea::Error),
            archive_size: self.get(CacheArea::Archive),
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.snapshot().total()
    }

    /// Backpressure level against a ceiling in bytes (0 = unlimited).
    #[must_use]
    pub fn level(&self, max_size: u64) -> BackpressureLevel {
        BackpressureLevel::from_usage(self.total(), max_size)
    }

    /// Reset every counter from what is actually on disk below `base`.
    pub async fn recompute(&self, base: &Path) -> UsageSnapshot {
        let cache = dir_size(&base.join(VALUE_FOLDER)).await + dir_size(&base.join(FILE_FOLDER)).await;
        let error = dir_size(&base.join(VALUE_ERROR_FOLDER)).await + dir_size(&base.join(FILE_ERROR_FOLDER)).await;
        let archive = dir_size(&base.join(ARCHIVE_FOLDER)).await;
        self.set(CacheArea::Cache, cache);
        self.set(CacheArea::Error, error);
        self.set(CacheArea::Archive, archive);
        self.snapshot()
    }
}
