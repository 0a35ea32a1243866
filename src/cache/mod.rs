//! Per-destination disk caches.
//!
//! Each connector owns one base folder:
//!
//! ```text
//! <cache_folder>/<connector id>/
//!     values/          buffer, queue and compacted value files
//!     values-errors/   quarantined value files
//!     files/           raw files awaiting delivery
//!     files-errors/    quarantined raw files
//!     archive/         delivered raw files kept for the retention period
//! ```
//!
//! The folders are the source of truth. In-memory indexes are rebuilt from
//! them on every start.

pub mod archive;
pub mod file_cache;
pub mod fs;
pub mod usage;
pub mod value_cache;

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

pub use archive::ArchiveService;
pub use file_cache::{FileCache, FileCacheSettings};
pub use fs::{create_base_folders, CacheFileInfo, FileQuery, Page};
pub use usage::{CacheArea, CacheUsage, UsageSnapshot};
pub use value_cache::{ValueCache, ValueCacheSettings, ValueUnit};

/// Delay between a start and the first retention sweep. Later sweeps follow
/// the configured sweep interval.
pub(crate) const FIRST_SWEEP_DELAY: Duration = Duration::from_secs(10);

/// "Unit available, run now" notification from a cache to its orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSignal {
    ValuesReady,
    FilesReady,
}

/// Non-blocking send. A full channel already holds a pending signal, and the
/// orchestrator coalesces triggers anyway.
pub(crate) fn notify(signals: &mpsc::Sender<CacheSignal>, signal: CacheSignal, connector: &str) {
    match signals.try_send(signal) {
        Ok(()) => trace!(connector = %connector, ?signal, "Cache signal sent"),
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!(connector = %connector, ?signal, "Signal channel full, trigger already pending")
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            trace!(connector = %connector, ?signal, "Signal channel closed")
        }
    }
}
