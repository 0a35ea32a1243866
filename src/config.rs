//! Configuration for the delivery engine and its North connectors.
//!
//! # Example
//!
//! ```
//! use north_engine::{EngineConfig, CachingSettings};
//!
//! // Minimal config (uses defaults)
//! let config = EngineConfig::default();
//! assert_eq!(config.buffer_timeout_ms, 300);
//!
//! // Caching policy with a 50 MB ceiling
//! let mut caching = CachingSettings::default();
//! caching.throttling.max_size = 50 * 1024 * 1024;
//! assert_eq!(caching.trigger.number_of_elements, 1_000);
//! ```

use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// Process-wide engine settings shared by every connector.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Root of all connector cache folders; each connector gets `<cache_folder>/<connector id>`
    #[serde(default = "default_cache_folder")]
    pub cache_folder: PathBuf,

    /// Time-based flush of the value buffer (default: 300 ms)
    #[serde(default = "default_buffer_timeout_ms")]
    pub buffer_timeout_ms: u64,

    /// Buffered value count that forces an immediate flush
    #[serde(default = "default_buffer_max")]
    pub buffer_max: usize,

    /// Interval between two archive/error retention sweeps (default: 1 hour)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Capacity of the cache → orchestrator signal channel
    #[serde(default = "default_signal_capacity")]
    pub signal_capacity: usize,
}

fn default_cache_folder() -> PathBuf { PathBuf::from("./cache") }
fn default_buffer_timeout_ms() -> u64 { 300 }
fn default_buffer_max() -> usize { 250 }
fn default_sweep_interval_secs() -> u64 { 3600 }
fn default_signal_capacity() -> usize { 16 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_folder: default_cache_folder(),
            buffer_timeout_ms: default_buffer_timeout_ms(),
            buffer_max: default_buffer_max(),
            sweep_interval_secs: default_sweep_interval_secs(),
            signal_capacity: default_signal_capacity(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn buffer_timeout(&self) -> Duration {
        Duration::from_millis(self.buffer_timeout_ms)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Base folder owned by one connector.
    #[must_use]
    pub fn connector_folder(&self, connector_id: &str) -> PathBuf {
        self.cache_folder.join(connector_id)
    }
}

/// Snapshot of a North connector as stored by the configuration repository.
#[derive(Debug, Clone, Deserialize)]
pub struct NorthConnectorConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub connector_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Destination-specific settings, opaque to the engine
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub caching: CachingSettings,
}

fn default_enabled() -> bool { true }

impl NorthConnectorConfig {
    pub fn new(id: impl Into<String>, connector_type: impl Into<String>, caching: CachingSettings) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            connector_type: connector_type.into(),
            description: String::new(),
            enabled: true,
            settings: Value::Null,
            caching,
        }
    }
}

/// Caching policy of one destination.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CachingSettings {
    #[serde(default)]
    pub trigger: TriggerSettings,
    #[serde(default)]
    pub throttling: ThrottlingSettings,
    #[serde(default)]
    pub error: ErrorSettings,
    #[serde(default)]
    pub archive: ArchiveSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerSettings {
    /// Scan mode driving periodic runs
    #[serde(default)]
    pub scan_mode_id: String,
    /// Queued value count that triggers a run without waiting for the scan mode
    #[serde(default = "default_number_of_elements")]
    pub number_of_elements: usize,
    /// Queued file count that triggers a run (0 = disabled)
    #[serde(default)]
    pub number_of_files: usize,
}

fn default_number_of_elements() -> usize { 1_000 }

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            scan_mode_id: String::new(),
            number_of_elements: default_number_of_elements(),
            number_of_files: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThrottlingSettings {
    /// Minimum delay between two run starts, in milliseconds
    #[serde(default = "default_run_min_delay")]
    pub run_min_delay: u64,
    /// Disk ceiling for cache + errors + archive, in bytes (0 = unlimited)
    #[serde(default)]
    pub max_size: u64,
    /// Maximum values per send; also the compaction threshold
    #[serde(default = "default_max_number_of_elements")]
    pub max_number_of_elements: usize,
}

fn default_run_min_delay() -> u64 { 200 }
fn default_max_number_of_elements() -> usize { 10_000 }

impl Default for ThrottlingSettings {
    fn default() -> Self {
        Self {
            run_min_delay: default_run_min_delay(),
            max_size: 0,
            max_number_of_elements: default_max_number_of_elements(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorSettings {
    /// Delay before a failed unit is attempted again, in milliseconds
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Hours errored files are kept before the sweep removes them (0 = forever)
    #[serde(default)]
    pub retention_duration: u64,
}

fn default_retry_interval() -> u64 { 5_000 }
fn default_retry_count() -> u32 { 3 }

impl Default for ErrorSettings {
    fn default() -> Self {
        Self {
            retry_interval: default_retry_interval(),
            retry_count: default_retry_count(),
            retention_duration: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Hours archived files are kept (0 = forever)
    #[serde(default = "default_archive_retention")]
    pub retention_duration: u64,
}

fn default_archive_retention() -> u64 { 720 }

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            retention_duration: default_archive_retention(),
        }
    }
}

impl ArchiveSettings {
    /// Retention as a duration, `None` when files are kept forever.
    #[must_use]
    pub fn retention(&self) -> Option<Duration> {
        hours(self.retention_duration)
    }
}

impl ErrorSettings {
    #[must_use]
    pub fn retention(&self) -> Option<Duration> {
        hours(self.retention_duration)
    }

    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval)
    }
}

fn hours(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value * 3600))
}
