//! # North Engine
//!
//! Outbound delivery engine of an industrial data gateway. Each North
//! connector (a destination such as a historian, a REST endpoint or a file
//! share) gets a disk-backed cache, a cron-driven scheduler and a
//! retry/quarantine state machine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Ingest Layer                         │
//! │  • cache_values() / cache_file() from South connectors     │
//! │  • Backpressure: reject while disk usage >= max_size       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Disk Caches                             │
//! │  • values/: buffer → queue → compacted files               │
//! │  • files/: raw files, oldest first                         │
//! │  • *-errors/, archive/: quarantine and retention           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               (cron scan modes, value/file triggers)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Connector Orchestrator                     │
//! │  • Coalescing FIFO of tasks, one run in flight             │
//! │  • Pinned unit + retry policy, quarantine after R+1        │
//! │  • NorthDestination::handle_content                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use north_engine::{
//!     CachingSettings, Content, DeliveryError, EngineConfig, InMemoryRepository,
//!     NorthConnectorConfig, NorthDestination, NorthOrchestrator,
//! };
//! use std::sync::Arc;
//!
//! struct Historian;
//!
//! #[async_trait]
//! impl NorthDestination for Historian {
//!     async fn handle_content(&self, content: &Content) -> Result<(), DeliveryError> {
//!         // POST the content, map the HTTP status
//!         let status = 200;
//!         if status >= 400 {
//!             return Err(DeliveryError::from_status(status, "rejected"));
//!         }
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let connector = NorthConnectorConfig::new("north-historian", "rest", CachingSettings::default());
//!     let repository = Arc::new(InMemoryRepository::new());
//!     repository.upsert_connector(connector.clone());
//!
//!     let north = Arc::new(NorthOrchestrator::new(
//!         EngineConfig::default(),
//!         connector,
//!         repository,
//!         Arc::new(Historian),
//!     ));
//!     north.start().await.expect("Failed to start");
//!
//!     north.cache_file("/tmp/report.csv".as_ref()).await.expect("Failed to cache");
//!
//!     north.stop().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`orchestrator`]: the [`NorthOrchestrator`] driving one destination
//! - [`cache`]: value cache, file cache, archive and disk usage
//! - [`scheduler`]: cron jobs and the coalescing task queue
//! - [`batching`]: in-memory index of buffered value files
//! - [`resilience`]: retry and quarantine policy
//! - [`backpressure`]: disk usage levels
//! - [`metrics`]: `metrics` crate instrumentation and live connector metrics

pub mod backpressure;
pub mod batching;
pub mod cache;
pub mod completion;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod north;
pub mod orchestrator;
pub mod repository;
pub mod resilience;
pub mod scheduler;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use backpressure::BackpressureLevel;
pub use batching::{BufferConfig, FlushReason, ValueBuffer};
pub use cache::{
    create_base_folders, ArchiveService, CacheArea, CacheFileInfo, CacheSignal, CacheUsage, FileCache,
    FileCacheSettings, FileQuery, Page, UsageSnapshot, ValueCache, ValueCacheSettings, ValueUnit,
};
pub use completion::Completion;
pub use config::{
    ArchiveSettings, CachingSettings, EngineConfig, ErrorSettings, NorthConnectorConfig, ThrottlingSettings,
    TriggerSettings,
};
pub use error::{DeliveryError, EngineError};
pub use metrics::{ConnectorMetrics, MetricsTracker};
pub use model::{Content, ScanMode, TimeValue, TimeValueData};
pub use north::NorthDestination;
pub use orchestrator::{Admission, ConnectorState, NorthOrchestrator};
pub use repository::{ConfigRepository, InMemoryRepository};
pub use resilience::{RetryDecision, RetryPolicy, RetryState};
pub use scheduler::{RunFlag, Scheduler, TaskEntry, TaskQueue};
