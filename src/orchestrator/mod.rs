// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connector orchestrator.
//!
//! A [`NorthOrchestrator`] drives one destination. It ties together:
//! - the value cache (buffer → queue → compacted files)
//! - the file cache and its archive
//! - the scan-mode scheduler and its coalescing task queue
//! - the retry/quarantine state of the unit currently being delivered
//!
//! # Lifecycle
//!
//! ```text
//! Stopped → Starting → Idle ⇄ Running → Stopping → Stopped
//! ```
//!
//! At most one run is in flight per connector. Triggers arriving while a run
//! is in progress stay queued (one per id) and start the next run.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use north_engine::{
//!     CachingSettings, Content, DeliveryError, EngineConfig, InMemoryRepository,
//!     NorthConnectorConfig, NorthDestination, NorthOrchestrator, ScanMode, TimeValue,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct Console;
//!
//! #[async_trait]
//! impl NorthDestination for Console {
//!     async fn handle_content(&self, _content: &Content) -> Result<(), DeliveryError> {
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut caching = CachingSettings::default();
//! caching.trigger.scan_mode_id = "every-10s".into();
//! let connector = NorthConnectorConfig::new("north-console", "console", caching);
//!
//! let repository = Arc::new(InMemoryRepository::new());
//! repository.upsert_scan_mode(ScanMode::new("every-10s", "Every 10s", "*/10 * * * * *"));
//! repository.upsert_connector(connector.clone());
//!
//! let north = Arc::new(NorthOrchestrator::new(
//!     EngineConfig::default(),
//!     connector,
//!     repository,
//!     Arc::new(Console),
//! ));
//! north.start().await.expect("start failed");
//! north
//!     .cache_values(vec![TimeValue::new("p1", "2024-01-01T00:00:00.000Z", json!(1))])
//!     .await
//!     .expect("cache failed");
//! north.stop().await;
//! # }
//! ```

mod inspect;
mod lifecycle;
mod run;
mod types;

pub use types::{Admission, ConnectorState};

use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backpressure::{as_megabytes, BackpressureLevel};
use crate::cache::{
    ArchiveService, CacheSignal, CacheUsage, FileCache, FileCacheSettings, UsageSnapshot, ValueCache,
    ValueCacheSettings,
};
use crate::completion::Completion;
use crate::config::{EngineConfig, NorthConnectorConfig};
use crate::error::{DeliveryError, EngineError};
use crate::metrics::{self, ConnectorMetrics, MetricsTracker};
use crate::model::{ScanMode, TimeValue};
use crate::north::NorthDestination;
use crate::repository::ConfigRepository;
use crate::resilience::retry::RetryPolicy;
use crate::scheduler::Scheduler;

use types::{PinnedFile, PinnedValues};

/// Receiving ends owned by the dispatcher while it runs.
pub(super) struct Receivers {
    pub next: mpsc::UnboundedReceiver<()>,
    pub signals: mpsc::Receiver<CacheSignal>,
}

/// Outbound delivery engine of one North connector.
///
/// # Thread Safety
///
/// Shared as `Arc<NorthOrchestrator>`. Data ingestion, inspection and the
/// lifecycle can be called concurrently; runs are serialized internally.
pub struct NorthOrchestrator {
    pub(super) id: String,

    pub(super) engine_config: EngineConfig,

    pub(super) repository: Arc<dyn ConfigRepository>,

    pub(super) destination: Arc<dyn NorthDestination>,

    /// Connector snapshot, reloaded from the repository on every start
    pub(super) settings: RwLock<NorthConnectorConfig>,

    /// South connector ids this connector receives data from (empty = all)
    pub(super) subscriptions: RwLock<Vec<String>>,

    pub(super) base_folder: PathBuf,

    /// Disk usage shared with every cache
    pub(super) usage: Arc<CacheUsage>,

    pub(super) value_cache: Arc<ValueCache>,
    pub(super) file_cache: Arc<FileCache>,
    pub(super) archive: Arc<ArchiveService>,

    pub(super) scheduler: Scheduler,

    pub(super) receivers: Arc<AsyncMutex<Receivers>>,
    pub(super) dispatcher: Mutex<Option<JoinHandle<()>>>,

    pub(super) state: watch::Sender<ConnectorState>,
    pub(super) state_rx: watch::Receiver<ConnectorState>,

    pub(super) metrics: MetricsTracker,

    /// Single-flight slot: `Some` while a run (or a cache reset) holds it
    pub(super) run_progress: Mutex<Option<Completion>>,

    pub(super) stopping: AtomicBool,

    pub(super) last_run_start: Mutex<Option<Instant>>,

    pub(super) pinned_values: Mutex<PinnedValues>,
    pub(super) pinned_file: Mutex<PinnedFile>,
}

impl NorthOrchestrator {
    /// Create a stopped orchestrator. Nothing touches the disk until
    /// [`start()`](Self::start).
    pub fn new(
        engine_config: EngineConfig,
        connector: NorthConnectorConfig,
        repository: Arc<dyn ConfigRepository>,
        destination: Arc<dyn NorthDestination>,
    ) -> Self {
        let id = connector.id.clone();
        let base_folder = engine_config.connector_folder(&id);
        let usage = Arc::new(CacheUsage::new());
        let (signal_tx, signal_rx) = mpsc::channel(engine_config.signal_capacity.max(1));

        let value_cache = Arc::new(ValueCache::new(
            &id,
            &base_folder,
            ValueCacheSettings::from_config(&engine_config, &connector.caching),
            Arc::clone(&usage),
            signal_tx.clone(),
        ));
        let archive = Arc::new(ArchiveService::new(
            &id,
            &base_folder,
            connector.caching.archive.clone(),
            engine_config.sweep_interval(),
            Arc::clone(&usage),
        ));
        let file_cache = Arc::new(FileCache::new(
            &id,
            &base_folder,
            FileCacheSettings::from_config(&engine_config, &connector.caching),
            Arc::clone(&archive),
            Arc::clone(&usage),
            signal_tx,
        ));

        let (scheduler, next) = Scheduler::new(id.clone());
        let (state_tx, state_rx) = watch::channel(ConnectorState::Stopped);
        let subscriptions = repository.list_subscriptions(&id);

        Self {
            metrics: MetricsTracker::new(id.clone()),
            id,
            engine_config,
            repository,
            destination,
            settings: RwLock::new(connector),
            subscriptions: RwLock::new(subscriptions),
            base_folder,
            usage,
            value_cache,
            file_cache,
            archive,
            scheduler,
            receivers: Arc::new(AsyncMutex::new(Receivers { next, signals: signal_rx })),
            dispatcher: Mutex::new(None),
            state: state_tx,
            state_rx,
            run_progress: Mutex::new(None),
            stopping: AtomicBool::new(false),
            last_run_start: Mutex::new(None),
            pinned_values: Mutex::new(PinnedValues::default()),
            pinned_file: Mutex::new(PinnedFile::default()),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current connector snapshot.
    #[must_use]
    pub fn settings(&self) -> NorthConnectorConfig {
        self.settings.read().clone()
    }

    #[must_use]
    pub fn base_folder(&self) -> &Path {
        &self.base_folder
    }

    #[must_use]
    pub fn state(&self) -> ConnectorState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectorState> {
        self.state_rx.clone()
    }

    pub(super) fn set_state(&self, state: ConnectorState) {
        self.state.send_replace(state);
        metrics::set_connector_state(&self.id, &state.to_string());
    }

    pub fn value_cache(&self) -> &Arc<ValueCache> {
        &self.value_cache
    }

    pub fn file_cache(&self) -> &Arc<FileCache> {
        &self.file_cache
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn usage(&self) -> UsageSnapshot {
        self.usage.snapshot()
    }

    /// Backpressure level against the configured `max_size`.
    #[must_use]
    pub fn pressure(&self) -> BackpressureLevel {
        self.usage.level(self.settings.read().caching.throttling.max_size)
    }

    /// Live metrics, updated after every run and cache mutation.
    #[must_use]
    pub fn metrics_stream(&self) -> watch::Receiver<ConnectorMetrics> {
        self.metrics.subscribe()
    }

    #[must_use]
    pub fn metrics_snapshot(&self) -> ConnectorMetrics {
        self.metrics.snapshot()
    }

    /// Restart counters from zero, keeping the current disk sizes.
    pub fn reset_metrics(&self) {
        self.metrics.reset(self.usage.snapshot());
    }

    pub(super) fn publish_usage(&self) {
        self.metrics.set_usage(self.usage.snapshot());
    }

    pub(super) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_settings(&self.settings.read().caching.error)
    }

    /// Does this connector receive data from `south_id`? An empty
    /// subscription list means every South connector.
    #[must_use]
    pub fn is_subscribed(&self, south_id: &str) -> bool {
        let subscriptions = self.subscriptions.read();
        subscriptions.is_empty() || subscriptions.iter().any(|id| id == south_id)
    }

    /// Reload the subscription list from the repository.
    pub fn refresh_subscriptions(&self) {
        *self.subscriptions.write() = self.repository.list_subscriptions(&self.id);
    }

    /// Persist values for later delivery.
    ///
    /// Values are split into chunks of at most `max_number_of_elements`.
    /// Returns [`Admission::Rejected`] (values discarded) while the cache is
    /// at or above `max_size`.
    pub async fn cache_values(&self, values: Vec<TimeValue>) -> Result<Admission, EngineError> {
        if values.is_empty() {
            return Ok(Admission::Accepted);
        }
        if self.admit("time-values", values.len()) == Admission::Rejected {
            return Ok(Admission::Rejected);
        }

        let chunk_size = self.settings.read().caching.throttling.max_number_of_elements.max(1);
        for chunk in values.chunks(chunk_size) {
            self.value_cache.cache_values(chunk).await?;
        }
        self.publish_usage();
        Ok(Admission::Accepted)
    }

    /// Copy a file into the cache for later delivery. The source is left
    /// untouched.
    pub async fn cache_file(&self, file_path: &Path) -> Result<Admission, EngineError> {
        if self.admit("raw", 1) == Admission::Rejected {
            return Ok(Admission::Rejected);
        }
        let cached = self.file_cache.cache_file(file_path).await?;
        debug!(connector = %self.id, source = %file_path.display(), cached = %cached.display(), "File cached");
        self.publish_usage();
        Ok(Admission::Accepted)
    }

    fn admit(&self, content: &str, count: usize) -> Admission {
        let max_size = self.settings.read().caching.throttling.max_size;
        let level = self.usage.level(max_size);
        metrics::set_backpressure_level(&self.id, level as u8);

        match level {
            BackpressureLevel::Normal => Admission::Accepted,
            BackpressureLevel::Warn => {
                debug!(connector = %self.id, level = %level, "Cache close to its maximum size");
                Admission::Accepted
            }
            BackpressureLevel::Full => {
                warn!(
                    connector = %self.id,
                    content,
                    count,
                    cache_mb = as_megabytes(self.usage.total()),
                    max_mb = as_megabytes(max_size),
                    "Cache full, discarding new content"
                );
                metrics::record_rejected(&self.id, content);
                Admission::Rejected
            }
        }
    }

    /// Re-create the cron job of an updated scan mode if this connector
    /// uses it.
    pub fn update_scan_mode(&self, scan_mode: &ScanMode) -> Result<(), EngineError> {
        self.scheduler.update_scan_mode(scan_mode)
    }

    /// Check the destination with the current settings.
    pub async fn test_connection(&self) -> Result<(), DeliveryError> {
        match self.destination.test_connection().await {
            Ok(()) => {
                info!(connector = %self.id, "Connection test succeeded");
                Ok(())
            }
            Err(e) => {
                error!(connector = %self.id, error = %e, "Connection test failed");
                Err(e)
            }
        }
    }

    /// True when neither values nor files wait in the queue.
    pub async fn is_cache_empty(&self) -> bool {
        self.value_cache.is_empty().await && self.file_cache.is_empty().await
    }
}

impl Drop for NorthOrchestrator {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.get_mut().take() {
            dispatcher.abort();
        }
    }
}
