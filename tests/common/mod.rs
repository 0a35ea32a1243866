//! Shared fixtures: a scripted destination and a connector harness.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use north_engine::{
    CachingSettings, ConfigRepository, ConnectorState, Content, DeliveryError, EngineConfig, InMemoryRepository,
    NorthConnectorConfig, NorthDestination, NorthOrchestrator, ScanMode, TaskEntry, TimeValue,
};

pub const CONNECTOR_ID: &str = "north-test";

/// What the destination received on one successful or failed call.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Values(Vec<TimeValue>),
    /// Cached file name and its content at delivery time
    File { name: String, content: Vec<u8> },
}

/// Destination answering from a script of results; `Ok` once the script is
/// exhausted.
#[derive(Default)]
pub struct ScriptedDestination {
    script: Mutex<VecDeque<Result<(), DeliveryError>>>,
    accepted: Mutex<Vec<Delivery>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Mutex<Duration>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl ScriptedDestination {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_results(&self, results: impl IntoIterator<Item = Result<(), DeliveryError>>) {
        self.script.lock().extend(results);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> Vec<Delivery> {
        self.accepted.lock().clone()
    }

    pub fn accepted_values(&self) -> Vec<TimeValue> {
        self.accepted
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Values(values) => Some(values.clone()),
                Delivery::File { .. } => None,
            })
            .flatten()
            .collect()
    }

    pub fn accepted_files(&self) -> Vec<String> {
        self.accepted
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::File { name, .. } => Some(name.clone()),
                Delivery::Values(_) => None,
            })
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NorthDestination for ScriptedDestination {
    async fn connect(&self) -> Result<(), DeliveryError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeliveryError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn handle_content(&self, content: &Content) -> Result<(), DeliveryError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let delivery = match content {
            Content::TimeValues(values) => Delivery::Values(values.clone()),
            Content::Raw { file_path } => Delivery::File {
                name: file_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                content: tokio::fs::read(file_path).await.unwrap_or_default(),
            },
        };

        let result = self.script.lock().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.accepted.lock().push(delivery);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Caching settings for fast tests: no run delay, no retry backoff, no
/// automatic triggers.
pub fn test_caching() -> CachingSettings {
    let mut caching = CachingSettings::default();
    caching.trigger.scan_mode_id = "manual".into();
    caching.trigger.number_of_elements = 1_000_000;
    caching.trigger.number_of_files = 0;
    caching.throttling.run_min_delay = 0;
    caching.error.retry_interval = 0;
    caching
}

pub struct Harness {
    pub dir: TempDir,
    pub engine: EngineConfig,
    pub repository: Arc<InMemoryRepository>,
    pub destination: Arc<ScriptedDestination>,
    pub north: Arc<NorthOrchestrator>,
}

impl Harness {
    pub fn new(caching: CachingSettings) -> Self {
        Self::with_engine(caching, |_| {})
    }

    pub fn with_engine(caching: CachingSettings, tweak: impl FnOnce(&mut EngineConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = EngineConfig {
            cache_folder: dir.path().join("cache"),
            buffer_timeout_ms: 20,
            ..Default::default()
        };
        tweak(&mut engine);

        let repository = Arc::new(InMemoryRepository::new());
        let connector = NorthConnectorConfig::new(CONNECTOR_ID, "scripted", caching);
        repository.upsert_connector(connector.clone());
        repository.upsert_scan_mode(manual_scan_mode());

        let destination = ScriptedDestination::new();
        let north = Arc::new(NorthOrchestrator::new(
            engine.clone(),
            connector,
            repository.clone(),
            destination.clone(),
        ));
        Self {
            dir,
            engine,
            repository,
            destination,
            north,
        }
    }

    /// Same folders, repository and destination, new orchestrator.
    pub fn restart(&mut self) -> Arc<NorthOrchestrator> {
        let connector = self.repository.find_connector_by_id(CONNECTOR_ID).unwrap();
        self.north = Arc::new(NorthOrchestrator::new(
            self.engine.clone(),
            connector,
            self.repository.clone(),
            self.destination.clone(),
        ));
        self.north.clone()
    }

    /// Write a source file outside the cache.
    pub fn source_file(&self, name: &str, content: &[u8]) -> std::path::PathBuf {
        let folder = self.dir.path().join("south");
        std::fs::create_dir_all(&folder).unwrap();
        let path = folder.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Queue one run of the manual scan mode and wait until it has finished.
    pub async fn run_once(&self) {
        wait_idle(&self.north).await;
        self.north.scheduler().add_to_queue(TaskEntry::ScanMode(manual_scan_mode()));
        wait_idle(&self.north).await;
    }
}

/// Scan mode that only fires on January 1st; tests queue it by hand.
pub fn manual_scan_mode() -> ScanMode {
    ScanMode::new("manual", "Manual", "0 0 1 1 *")
}

/// Poll `condition` every 5 ms for up to 5 s.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until no task is queued and no run is in progress.
pub async fn wait_idle(north: &NorthOrchestrator) {
    assert!(
        wait_until(|| north.scheduler().queue().is_empty() && north.state() == ConnectorState::Idle).await,
        "connector did not become idle"
    );
}

pub fn values(prefix: &str, count: usize) -> Vec<TimeValue> {
    (0..count)
        .map(|i| TimeValue::new(format!("{prefix}-{i}"), "2024-01-01T00:00:00.000Z", json!(i)))
        .collect()
}

pub fn file_count(folder: &Path) -> usize {
    std::fs::read_dir(folder).map(|entries| entries.count()).unwrap_or(0)
}

/// Files in `folder` whose name ends with `suffix`.
pub fn value_files(folder: &Path, suffix: &str) -> usize {
    std::fs::read_dir(folder)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().ends_with(suffix))
                .count()
        })
        .unwrap_or(0)
}

/// Value files flushed into the queue and ready to send.
pub fn queued_value_files(north: &NorthOrchestrator) -> usize {
    value_files(north.value_cache().folder(), "queue.tmp")
}
