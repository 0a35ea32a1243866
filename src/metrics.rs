// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the delivery engine.
//!
//! Two layers:
//! - free functions over the `metrics` crate, backend-agnostic; the embedding
//!   gateway picks the exporter (Prometheus, OTEL, etc.)
//! - [`ConnectorMetrics`], a per-connector snapshot published on a `watch`
//!   channel for live dashboards
//!
//! # Metric Naming Convention
//! - `north_engine_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for sizes
//!
//! # Labels
//! - `connector`: North connector id
//! - `content`: time-values, raw
//! - `status`: success, error

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;

use crate::cache::UsageSnapshot;
use crate::model::TimeValue;

/// Record one delivery attempt
pub fn record_delivery(connector: &str, content: &str, status: &str) {
    counter!(
        "north_engine_deliveries_total",
        "connector" => connector.to_string(),
        "content" => content.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record how long a destination took to accept or refuse a unit
pub fn record_delivery_latency(connector: &str, content: &str, duration: Duration) {
    histogram!(
        "north_engine_delivery_seconds",
        "connector" => connector.to_string(),
        "content" => content.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_values_sent(connector: &str, count: usize) {
    counter!("north_engine_values_sent_total", "connector" => connector.to_string()).increment(count as u64);
}

pub fn record_file_sent(connector: &str) {
    counter!("north_engine_files_sent_total", "connector" => connector.to_string()).increment(1);
}

/// Record a unit moved to the error folder
pub fn record_quarantine(connector: &str, content: &str) {
    counter!(
        "north_engine_quarantined_total",
        "connector" => connector.to_string(),
        "content" => content.to_string()
    )
    .increment(1);
}

/// Record data discarded by backpressure
pub fn record_rejected(connector: &str, content: &str) {
    counter!(
        "north_engine_rejected_total",
        "connector" => connector.to_string(),
        "content" => content.to_string()
    )
    .increment(1);
}

/// Record a buffer flush into the queue
pub fn record_flush(connector: &str, reason: &str, count: usize) {
    counter!(
        "north_engine_flushes_total",
        "connector" => connector.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
    histogram!("north_engine_flush_size", "connector" => connector.to_string()).record(count as f64);
}

/// Record files removed by a retention sweep (`area`: archive, error)
pub fn record_files_expired(connector: &str, area: &str, count: usize) {
    counter!(
        "north_engine_expired_files_total",
        "connector" => connector.to_string(),
        "area" => area.to_string()
    )
    .increment(count as u64);
}

/// Record a trigger dropped because the same task was already pending
pub fn record_trigger_coalesced(connector: &str, task: &str) {
    counter!(
        "north_engine_triggers_coalesced_total",
        "connector" => connector.to_string(),
        "task" => task.to_string()
    )
    .increment(1);
}

/// Record a finished run
pub fn record_run(connector: &str, flag: &str, duration: Duration) {
    histogram!(
        "north_engine_run_seconds",
        "connector" => connector.to_string(),
        "flag" => flag.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set cache/error/archive disk usage
pub fn set_cache_usage(connector: &str, usage: &UsageSnapshot) {
    gauge!("north_engine_cache_bytes", "connector" => connector.to_string()).set(usage.cache_size as f64);
    gauge!("north_engine_error_bytes", "connector" => connector.to_string()).set(usage.error_size as f64);
    gauge!("north_engine_archive_bytes", "connector" => connector.to_string()).set(usage.archive_size as f64);
}

/// Set backpressure level (0 = Normal, 1 = Warn, 2 = Full)
pub fn set_backpressure_level(connector: &str, level: u8) {
    gauge!("north_engine_backpressure_level", "connector" => connector.to_string()).set(level as f64);
}

/// Set connector state (for monitoring dashboards)
pub fn set_connector_state(connector: &str, state: &str) {
    gauge!(
        "north_engine_state",
        "connector" => connector.to_string(),
        "state" => state.to_string()
    )
    .set(1.0);
}

/// Live view of one connector, pushed on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorMetrics {
    pub metrics_start: DateTime<Utc>,
    pub last_connection: Option<DateTime<Utc>>,
    pub last_run_start: Option<DateTime<Utc>>,
    /// Milliseconds
    pub last_run_duration: Option<u64>,
    pub number_of_values_sent: u64,
    pub number_of_files_sent: u64,
    pub last_value_sent: Option<TimeValue>,
    pub last_file_sent: Option<String>,
    pub current_cache_size: u64,
    pub current_error_size: u64,
    pub current_archive_size: u64,
}

impl ConnectorMetrics {
    fn fresh(usage: UsageSnapshot) -> Self {
        Self {
            metrics_start: Utc::now(),
            last_connection: None,
            last_run_start: None,
            last_run_duration: None,
            number_of_values_sent: 0,
            number_of_files_sent: 0,
            last_value_sent: None,
            last_file_sent: None,
            current_cache_size: usage.cache_size,
            current_error_size: usage.error_size,
            current_archive_size: usage.archive_size,
        }
    }
}

impl Default for ConnectorMetrics {
    fn default() -> Self {
        Self::fresh(UsageSnapshot::default())
    }
}

/// Owner of a connector's [`ConnectorMetrics`] channel.
#[derive(Debug)]
pub struct MetricsTracker {
    connector_id: String,
    tx: watch::Sender<ConnectorMetrics>,
}

impl MetricsTracker {
    pub fn new(connector_id: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(ConnectorMetrics::default());
        Self {
            connector_id: connector_id.into(),
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectorMetrics> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ConnectorMetrics {
        self.tx.borrow().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut ConnectorMetrics)) {
        self.tx.send_modify(f);
    }

    /// Refresh the size fields and the matching gauges
    pub fn set_usage(&self, usage: UsageSnapshot) {
        set_cache_usage(&self.connector_id, &usage);
        self.tx.send_if_modified(|m| {
            let changed = m.current_cache_size != usage.cache_size
                || m.current_error_size != usage.error_size
                || m.current_archive_size != usage.archive_size;
            m.current_cache_size = usage.cache_size;
            m.current_error_size = usage.error_size;
            m.current_archive_size = usage.archive_size;
            changed
        });
    }

    /// Start counting from zero, keeping the current sizes
    pub fn reset(&self, usage: UsageSnapshot) {
        self.tx.send_replace(ConnectorMetrics::fresh(usage));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // These verify the API doesn't panic without an installed recorder.

    #[test]
    fn test_counters_and_histograms() {
        record_delivery("north-1", "time-values", "success");
        record_delivery_latency("north-1", "raw", Duration::from_millis(12));
        record_values_sent("north-1", 250);
        record_file_sent("north-1");
        record_quarantine("north-1", "raw");
        record_rejected("north-1", "time-values");
        record_flush("north-1", "max-flush", 100);
        record_files_expired("north-1", "archive", 3);
        record_trigger_coalesced("north-1", "value-trigger");
        record_run("north-1", "scan", Duration::from_millis(40));
    }

    #[test]
    fn test_gauges() {
        set_cache_usage("north-1", &UsageSnapshot { cache_size: 10, error_size: 2, archive_size: 1 });
        set_backpressure_level("north-1", 1);
        set_connector_state("north-1", "Idle");
    }

    #[tokio::test]
    async fn test_tracker_publishes_changes() {
        let tracker = MetricsTracker::new("north-1");
        let mut rx = tracker.subscribe();

        tracker.update(|m| {
            m.number_of_values_sent += 3;
            m.last_value_sent = Some(TimeValue::new("p", "2024-01-01T00:00:00.000Z", json!(1)));
        });
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().number_of_values_sent, 3);

        // Same sizes: no notification
        tracker.set_usage(UsageSnapshot::default());
        assert!(!rx.has_changed().unwrap());

        tracker.set_usage(UsageSnapshot { cache_size: 5, error_size: 0, archive_size: 0 });
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_reset_keeps_sizes() {
        let tracker = MetricsTracker::new("north-1");
        tracker.update(|m| m.number_of_files_sent = 9);
        tracker.reset(UsageSnapshot { cache_size: 7, error_size: 1, archive_size: 2 });

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.number_of_files_sent, 0);
        assert_eq!(snapshot.current_cache_size, 7);
        assert_eq!(snapshot.current_archive_size, 2);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let value = serde_json::to_value(ConnectorMetrics::default()).unwrap();
        assert!(value.get("numberOfValuesSent").is_some());
        assert!(value.get("currentArchiveSize").is_some());
    }
}
