//! End-to-end tests of a North connector against a scripted destination.
//!
//! Every test runs on a real tokio runtime with its cache in a temporary
//! folder.
//!
//! # Test Organization
//! - `happy_*` - delivery, triggers, archive
//! - `failure_*` - retry, quarantine, backpressure, restart recovery

mod common;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use common::{
    file_count, queued_value_files, test_caching, value_files, values, wait_idle, wait_until, Harness,
};
use north_engine::{Admission, ConnectorState, DeliveryError, FileQuery, FlushReason, TaskEntry};

// =============================================================================
// Happy Path Tests
// =============================================================================

#[tokio::test]
async fn happy_lifecycle_connects_and_disconnects() {
    let h = Harness::new(test_caching());
    let mut states = h.north.state_receiver();
    assert_eq!(h.north.state(), ConnectorState::Stopped);

    h.north.start().await.unwrap();
    assert_eq!(h.north.state(), ConnectorState::Idle);
    assert_eq!(h.destination.connects(), 1);
    assert!(h.north.metrics_snapshot().last_connection.is_some());
    assert!(h.north.scheduler().has_job("manual"));
    for folder in ["values", "values-errors", "files", "files-errors", "archive"] {
        assert!(h.north.base_folder().join(folder).is_dir(), "{folder} missing");
    }

    h.north.stop().await;
    assert_eq!(h.north.state(), ConnectorState::Stopped);
    assert_eq!(h.destination.disconnects(), 1);
    assert!(!h.north.scheduler().has_job("manual"));
    assert!(states.has_changed().unwrap());
}

#[tokio::test]
async fn happy_start_fails_for_unknown_connector() {
    let h = Harness::new(test_caching());
    h.repository.remove_connector(common::CONNECTOR_ID);

    assert!(h.north.start().await.is_err());
    assert_eq!(h.north.state(), ConnectorState::Stopped);
}

#[tokio::test]
async fn happy_values_sent_then_removed() {
    let h = Harness::new(test_caching());
    h.north.start().await.unwrap();

    let batch = values("pump", 3);
    assert_eq!(h.north.cache_values(batch.clone()).await.unwrap(), Admission::Accepted);
    assert!(wait_until(|| queued_value_files(&h.north) == 1).await);
    assert!(!h.north.is_cache_empty().await);

    h.run_once().await;
    assert_eq!(h.destination.accepted_values(), batch);
    assert!(h.north.is_cache_empty().await);

    let metrics = h.north.metrics_snapshot();
    assert_eq!(metrics.number_of_values_sent, 3);
    assert_eq!(metrics.last_value_sent, batch.last().cloned());
    assert!(metrics.last_run_duration.is_some());
    assert_eq!(metrics.current_cache_size, 0);
    h.north.stop().await;
}

#[tokio::test]
async fn happy_group_count_triggers_run_without_timer() {
    let mut caching = test_caching();
    caching.trigger.number_of_elements = 100;
    // Only the group count can flush within the test
    let h = Harness::with_engine(caching, |engine| engine.buffer_timeout_ms = 60_000);
    h.north.start().await.unwrap();

    h.north.cache_values(values("a", 50)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.destination.calls(), 0);

    h.north.cache_values(values("b", 50)).await.unwrap();
    assert!(wait_until(|| h.destination.calls() == 1).await, "group count did not trigger a run");
    wait_idle(&h.north).await;
    assert_eq!(h.destination.accepted_values().len(), 100);

    h.north.cache_values(values("c", 50)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.destination.calls(), 1);
    h.north.stop().await;
}

#[tokio::test]
async fn happy_files_archived_then_expired() {
    let mut caching = test_caching();
    caching.archive.enabled = true;
    caching.archive.retention_duration = 1;
    let h = Harness::new(caching);
    h.north.start().await.unwrap();

    let a = h.source_file("a.csv", b"a;1");
    let b = h.source_file("b.csv", b"b;2");
    h.north.cache_file(&a).await.unwrap();
    h.north.cache_file(&b).await.unwrap();

    h.run_once().await;
    h.run_once().await;

    let sent = h.destination.accepted_files();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].starts_with("a-") && sent[1].starts_with("b-"), "{sent:?}");
    assert!(h.north.is_cache_empty().await);

    let archived = h.north.archive_files(&FileQuery::all()).await.unwrap();
    assert_eq!(archived.total_elements, 2);
    assert_eq!(h.north.metrics_snapshot().last_file_sent.as_deref(), Some(sent[1].as_str()));

    let archive = h.north.file_cache().archive().clone();
    let later = SystemTime::now() + Duration::from_secs(30 * 60);
    assert_eq!(archive.refresh_archive_folder_at(later).await, 0);
    let later = SystemTime::now() + Duration::from_secs(61 * 60);
    assert_eq!(archive.refresh_archive_folder_at(later).await, 2);
    assert_eq!(h.north.archive_files(&FileQuery::all()).await.unwrap().total_elements, 0);
    assert_eq!(h.north.usage().archive_size, 0);
    h.north.stop().await;
}

#[tokio::test]
async fn happy_file_trigger() {
    let mut caching = test_caching();
    caching.trigger.number_of_files = 1;
    let h = Harness::new(caching);
    h.north.start().await.unwrap();

    let report = h.source_file("report.csv", b"x");
    h.north.cache_file(&report).await.unwrap();
    assert!(wait_until(|| h.destination.accepted_files().len() == 1).await);
    // Archive disabled: the cached copy is deleted, the source untouched
    wait_idle(&h.north).await;
    assert_eq!(file_count(&h.north.base_folder().join("archive")), 0);
    assert!(report.exists());
    h.north.stop().await;
}

#[tokio::test]
async fn happy_triggers_coalesce_while_pending() {
    let h = Harness::new(test_caching());
    h.north.start().await.unwrap();
    h.destination.set_delay(Duration::from_millis(100));
    h.north.cache_values(values("v", 1)).await.unwrap();
    assert!(wait_until(|| queued_value_files(&h.north) == 1).await);

    let queue = h.north.scheduler().queue().clone();
    assert!(queue.add(TaskEntry::ScanMode(common::manual_scan_mode())));
    assert!(!queue.add(TaskEntry::ScanMode(common::manual_scan_mode())));
    assert!(queue.add(TaskEntry::ValueTrigger));
    assert!(!queue.add(TaskEntry::ValueTrigger));

    wait_idle(&h.north).await;
    assert_eq!(h.destination.calls(), 1);
    h.north.stop().await;
}

#[tokio::test]
async fn happy_single_flight_under_trigger_bursts() {
    let mut caching = test_caching();
    caching.trigger.number_of_elements = 1;
    caching.trigger.number_of_files = 1;
    let h = Harness::new(caching);
    h.north.start().await.unwrap();
    h.destination.set_delay(Duration::from_millis(15));

    let mut tasks = Vec::new();
    for i in 0..5 {
        let north = h.north.clone();
        let source = h.source_file(&format!("f{i}.csv"), b"data");
        tasks.push(tokio::spawn(async move {
            north.cache_values(values(&format!("burst{i}"), 10)).await.unwrap();
            north.cache_file(&source).await.unwrap();
            north.scheduler().add_to_queue(TaskEntry::ScanMode(common::manual_scan_mode()));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Drain whatever the bursts left behind
    for _ in 0..10 {
        if h.north.is_cache_empty().await {
            break;
        }
        h.run_once().await;
    }
    assert!(h.north.is_cache_empty().await);
    assert_eq!(h.destination.accepted_values().len(), 50);
    assert_eq!(h.destination.accepted_files().len(), 5);
    assert_eq!(h.destination.max_in_flight(), 1);
    h.north.stop().await;
}

#[tokio::test]
async fn happy_stop_waits_for_in_flight_run() {
    let h = Harness::new(test_caching());
    h.north.start().await.unwrap();
    h.destination.set_delay(Duration::from_millis(150));
    h.north.cache_values(values("v", 2)).await.unwrap();
    assert!(wait_until(|| queued_value_files(&h.north) == 1).await);

    h.north.scheduler().add_to_queue(TaskEntry::ScanMode(common::manual_scan_mode()));
    assert!(wait_until(|| h.north.state() == ConnectorState::Running).await);

    h.north.stop().await;
    // Never cancelled: the delivery completed and its values were removed
    assert_eq!(h.destination.accepted_values().len(), 2);
    assert!(h.north.is_cache_empty().await);
    assert_eq!(h.north.state(), ConnectorState::Stopped);
}

// =============================================================================
// Failure Scenario Tests
// =============================================================================

#[tokio::test]
async fn failure_fatal_error_quarantined_on_r_plus_one() {
    let mut caching = test_caching();
    caching.error.retry_count = 2;
    let h = Harness::new(caching);
    h.north.start().await.unwrap();
    h.destination
        .push_results((0..3).map(|i| Err(DeliveryError::fatal(format!("400 bad request #{i}")))));

    let batch = values("v", 4);
    h.north.cache_values(batch.clone()).await.unwrap();
    assert!(wait_until(|| queued_value_files(&h.north) == 1).await);

    for attempt in 1..=2 {
        h.run_once().await;
        assert_eq!(h.destination.calls(), attempt);
        assert_eq!(
            h.north.value_error_files(&FileQuery::all()).await.unwrap().total_elements,
            0,
            "quarantined early at attempt {attempt}"
        );
    }

    h.run_once().await;
    assert_eq!(h.destination.calls(), 3);
    let errors = h.north.value_error_files(&FileQuery::all()).await.unwrap();
    assert_eq!(errors.total_elements, 1);
    assert!(h.north.is_cache_empty().await);
    assert_eq!(h.north.value_error_content(&errors.content[0].filename).await.unwrap(), batch);

    // Operator retry puts the unit back in the queue
    h.north.retry_all_value_errors().await.unwrap();
    h.run_once().await;
    assert_eq!(h.destination.accepted_values(), batch);
    assert!(h.north.is_cache_empty().await);
    h.north.stop().await;
}

#[tokio::test]
async fn failure_retryable_error_never_quarantined() {
    let mut caching = test_caching();
    caching.error.retry_count = 0;
    let h = Harness::new(caching);
    h.north.start().await.unwrap();
    h.destination
        .push_results((0..6).map(|_| Err(DeliveryError::retryable("503 service unavailable"))));

    let report = h.source_file("report.csv", b"x");
    h.north.cache_file(&report).await.unwrap();

    for _ in 0..6 {
        h.run_once().await;
        assert_eq!(h.north.error_files(&FileQuery::all()).await.unwrap().total_elements, 0);
    }
    h.run_once().await;
    assert_eq!(h.destination.accepted_files().len(), 1);
    assert_eq!(h.destination.calls(), 7);
    h.north.stop().await;
}

#[tokio::test]
async fn failure_retry_interval_defers_next_attempt() {
    let mut caching = test_caching();
    caching.error.retry_interval = 60_000;
    let h = Harness::new(caching);
    h.north.start().await.unwrap();
    h.destination.push_results([Err(DeliveryError::retryable("timeout"))]);

    let report = h.source_file("report.csv", b"x");
    h.north.cache_file(&report).await.unwrap();
    h.run_once().await;
    h.run_once().await;
    assert_eq!(h.destination.calls(), 1, "retried inside retry_interval");
    h.north.stop().await;
}

#[tokio::test]
async fn failure_file_quarantined_and_removed() {
    let mut caching = test_caching();
    caching.error.retry_count = 0;
    let h = Harness::new(caching);
    h.north.start().await.unwrap();
    h.destination.push_results([Err(DeliveryError::fatal("unsupported format"))]);

    let report = h.source_file("report.bin", b"\x00\x01");
    h.north.cache_file(&report).await.unwrap();
    h.run_once().await;

    let errors = h.north.error_files(&FileQuery::all()).await.unwrap();
    assert_eq!(errors.total_elements, 1);
    assert_eq!(h.north.error_file_content(&errors.content[0].filename).await.unwrap(), b"\x00\x01");
    assert!(h.north.usage().error_size > 0);

    h.north.remove_all_error_files().await.unwrap();
    assert_eq!(h.north.usage().error_size, 0);
    h.north.stop().await;
}

#[tokio::test]
async fn failure_backpressure_rejects_until_space_frees() {
    let mut caching = test_caching();
    caching.throttling.max_size = 1;
    let h = Harness::with_engine(caching, |engine| engine.buffer_timeout_ms = 60_000);
    h.north.start().await.unwrap();

    assert_eq!(h.north.cache_values(values("first", 5)).await.unwrap(), Admission::Accepted);
    let size = h.north.usage().total();
    assert!(size >= 1);

    for _ in 0..5 {
        assert_eq!(h.north.cache_values(values("more", 5)).await.unwrap(), Admission::Rejected);
        let report = h.source_file("report.csv", b"x");
        assert_eq!(h.north.cache_file(&report).await.unwrap(), Admission::Rejected);
        assert_eq!(h.north.usage().total(), size);
    }

    h.north.value_cache().flush(FlushReason::Manual).await.unwrap();
    h.run_once().await;
    assert_eq!(h.destination.accepted_values().len(), 5);
    assert_eq!(h.north.usage().total(), 0);

    assert_eq!(h.north.cache_values(values("again", 5)).await.unwrap(), Admission::Accepted);
    h.north.stop().await;
}

#[tokio::test]
async fn failure_restart_recovers_cached_units() {
    let mut h = Harness::with_engine(test_caching(), |engine| engine.buffer_timeout_ms = 60_000);
    h.north.start().await.unwrap();

    let batch = values("durable", 7);
    h.north.cache_values(batch.clone()).await.unwrap();
    let report = h.source_file("report.csv", b"payload");
    h.north.cache_file(&report).await.unwrap();
    // Still a buffer file: nothing flushed yet
    assert_eq!(value_files(h.north.value_cache().folder(), "buffer.tmp"), 1);

    h.north.stop().await;
    let north = h.restart();
    north.start().await.unwrap();
    assert!(north.usage().cache_size > 0);

    h.run_once().await;
    assert_eq!(h.destination.accepted_values(), batch);
    let files = h.destination.accepted();
    assert!(files
        .iter()
        .any(|d| matches!(d, common::Delivery::File { content, .. } if content == b"payload")));
    assert!(north.is_cache_empty().await);
    north.stop().await;
}

#[tokio::test]
async fn failure_reset_cache_clears_queue_and_errors() {
    let mut caching = test_caching();
    caching.error.retry_count = 0;
    caching.archive.enabled = true;
    let h = Harness::new(caching);
    h.north.start().await.unwrap();
    h.destination.push_results([Err(DeliveryError::fatal("nope"))]);

    let bad = h.source_file("bad.csv", b"bad");
    h.north.cache_file(&bad).await.unwrap();
    h.run_once().await;
    let good = h.source_file("good.csv", b"good");
    h.north.cache_file(&good).await.unwrap();
    h.run_once().await;
    assert_eq!(file_count(&h.north.base_folder().join("archive")), 1);

    h.north.cache_file(&good).await.unwrap();
    h.north.cache_values(values("v", 3)).await.unwrap();
    assert!(wait_until(|| queued_value_files(&h.north) == 1).await);

    h.north.reset_cache().await;
    assert!(h.north.is_cache_empty().await);
    assert_eq!(h.north.error_files(&FileQuery::all()).await.unwrap().total_elements, 0);
    // The archive survives a reset
    assert_eq!(file_count(&h.north.base_folder().join("archive")), 1);
    assert_eq!(h.north.usage().cache_size, 0);
    assert_eq!(h.north.usage().error_size, 0);
    h.north.stop().await;
}

#[tokio::test]
async fn failure_missing_scan_mode_is_not_fatal() {
    let mut caching = test_caching();
    caching.trigger.scan_mode_id = "deleted".into();
    let h = Harness::new(caching);

    h.north.start().await.unwrap();
    assert_eq!(h.north.state(), ConnectorState::Idle);
    assert!(!h.north.scheduler().has_job("deleted"));
    h.north.stop().await;
}

#[tokio::test]
async fn happy_inspection_surface() {
    let h = Harness::with_engine(test_caching(), |engine| engine.buffer_timeout_ms = 10);
    h.north.start().await.unwrap();

    h.north.cache_values(values("x", 2)).await.unwrap();
    assert!(wait_until(|| queued_value_files(&h.north) == 1).await);
    let queued = h.north.cache_value_files(&FileQuery::all()).await.unwrap();
    assert_eq!(queued.total_elements, 1);
    let name = queued.content[0].filename.clone();
    assert_eq!(h.north.cache_value_content(&name).await.unwrap().len(), 2);
    h.north.remove_cache_values(&[name]).await.unwrap();
    assert!(h.north.is_cache_empty().await);

    let report = h.source_file("report.csv", b"r");
    h.north.cache_file(&report).await.unwrap();
    let files = h.north.cache_files(&FileQuery::all()).await.unwrap();
    let name = files.content[0].filename.clone();
    assert_eq!(h.north.cache_file_content(&name).await.unwrap(), b"r");
    h.north.archive_cache_files(&[name.clone()]).await.unwrap();
    assert!(h.north.is_cache_empty().await);
    // Archive disabled: archiving a queued file deletes it
    assert_eq!(h.north.archive_files(&FileQuery::all()).await.unwrap().total_elements, 0);
    assert_eq!(h.north.usage().total(), 0);

    let mut metrics = h.north.metrics_stream();
    h.north.reset_metrics();
    assert!(metrics.has_changed().unwrap());
    assert_eq!(metrics.borrow_and_update().number_of_values_sent, 0);
    h.north.stop().await;
}

#[tokio::test]
async fn happy_restart_after_stop() {
    let h = Harness::new(test_caching());
    let north = Arc::clone(&h.north);
    north.start().await.unwrap();
    north.stop().await;
    north.start().await.unwrap();

    north.cache_values(values("again", 1)).await.unwrap();
    assert!(wait_until(|| queued_value_files(&north) == 1).await);
    h.run_once().await;
    assert_eq!(h.destination.accepted_values().len(), 1);
    north.stop().await;
}
