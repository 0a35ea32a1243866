//! Run loop: one queued task at a time, values then files.

use chrono::Utc;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::completion::Completion;
use crate::error::DeliveryError;
use crate::metrics;
use crate::model::Content;
use crate::resilience::retry::RetryDecision;
use crate::scheduler::TaskEntry;

use super::types::PendingValues;
use super::{ConnectorState, NorthOrchestrator};

impl NorthOrchestrator {
    /// Start a run for the queue head unless one is already in progress.
    ///
    /// The run slot is claimed before the run is spawned, so two signals
    /// arriving back to back never start two runs. Once `stop()` has raised
    /// `stopping`, no slot is claimed.
    pub(super) fn try_begin_run(self: &Arc<Self>) {
        let Some(entry) = self.scheduler.queue().head() else {
            return;
        };
        let completion = {
            let mut slot = self.run_progress.lock();
            // Read under the slot lock: `stop()` raises the flag under it too
            if self.stopping.load(Ordering::Acquire) {
                return;
            }
            if slot.is_some() {
                trace!(connector = %self.id, task = %entry.id(), "Run in progress, task stays queued");
                return;
            }
            let completion = Completion::new();
            *slot = Some(completion.clone());
            completion
        };

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.run(entry, completion).await;
        });
    }

    async fn run(&self, entry: TaskEntry, completion: Completion) {
        let flag = entry.flag();
        self.set_state(ConnectorState::Running);
        trace!(connector = %self.id, flag = flag.as_str(), "North run triggered");

        self.wait_run_min_delay().await;
        let run_start = Instant::now();
        *self.last_run_start.lock() = Some(run_start);
        self.metrics.update(|m| m.last_run_start = Some(Utc::now()));

        if flag.sends_values() {
            self.handle_values().await;
        }
        if flag.sends_files() {
            self.handle_files().await;
        }

        let elapsed = run_start.elapsed();
        metrics::record_run(&self.id, flag.as_str(), elapsed);
        self.metrics.update(|m| m.last_run_duration = Some(elapsed.as_millis() as u64));
        self.publish_usage();

        self.scheduler.queue().pop_if(entry.id());
        if !self.stopping.load(Ordering::Acquire) {
            self.set_state(ConnectorState::Idle);
        }
        self.release_run_slot(&completion);
    }

    /// Sleep so that two run starts are at least `run_min_delay` apart.
    async fn wait_run_min_delay(&self) {
        let min_delay = Duration::from_millis(self.settings.read().caching.throttling.run_min_delay);
        let previous = *self.last_run_start.lock();
        if let Some(previous) = previous {
            let elapsed = previous.elapsed();
            if elapsed < min_delay {
                tokio::time::sleep(min_delay - elapsed).await;
            }
        }
    }

    /// Deliver the pinned value unit, pinning the next one from the cache
    /// when none is pinned.
    pub(super) async fn handle_values(&self) {
        let policy = self.retry_policy();
        let pinned = {
            let mut pinned = self.pinned_values.lock();
            if pinned.unit.is_some() {
                if let Some(wait) = pinned.retry.remaining_backoff(&policy) {
                    debug!(connector = %self.id, wait_ms = wait.as_millis() as u64, "Values not retried yet");
                    return;
                }
            }
            pinned.unit.take()
        };

        let pending = match pinned {
            Some(pending) => pending,
            None => match self.value_cache.get_values_to_send().await {
                Ok(Some(unit)) => {
                    self.pinned_values.lock().retry.reset();
                    PendingValues {
                        keys: unit.keys,
                        content: Content::TimeValues(unit.values),
                    }
                }
                Ok(None) => {
                    trace!(connector = %self.id, "No values to send");
                    return;
                }
                Err(e) => {
                    error!(connector = %self.id, error = %e, "Could not read values to send");
                    return;
                }
            },
        };

        let count = pending.count();
        debug!(connector = %self.id, count, files = pending.keys.len(), "Sending values");
        let result = self.deliver(&pending.content).await;
        match result {
            Ok(()) => {
                self.value_cache.remove_sent_values(&pending.keys).await;
                metrics::record_values_sent(&self.id, count);
                let last = match pending.content {
                    Content::TimeValues(mut values) => values.pop(),
                    Content::Raw { .. } => None,
                };
                self.metrics.update(|m| {
                    m.number_of_values_sent += count as u64;
                    if last.is_some() {
                        m.last_value_sent = last;
                    }
                });
                self.pinned_values.lock().retry.reset();
            }
            Err(e) => {
                let (decision, error_count) = {
                    let mut pinned = self.pinned_values.lock();
                    let decision = pinned.retry.record_failure(&policy, &e);
                    (decision, pinned.retry.error_count())
                };
                warn!(
                    connector = %self.id,
                    error = %e,
                    retry = e.retry,
                    error_count,
                    count,
                    "Error while sending values"
                );
                match decision {
                    RetryDecision::Retry => self.pinned_values.lock().unit = Some(pending),
                    RetryDecision::Quarantine => {
                        self.value_cache.manage_errored_values(&pending.keys, error_count).await;
                        metrics::record_quarantine(&self.id, "time-values");
                        self.pinned_values.lock().retry.reset();
                    }
                }
            }
        }
    }

    /// Deliver the pinned file, pinning the oldest queued one when none is
    /// pinned or the pinned one was removed by an operator.
    pub(super) async fn handle_files(&self) {
        let policy = self.retry_policy();
        let pinned = {
            let mut pinned = self.pinned_file.lock();
            if pinned.unit.is_some() {
                if let Some(wait) = pinned.retry.remaining_backoff(&policy) {
                    debug!(connector = %self.id, wait_ms = wait.as_millis() as u64, "File not retried yet");
                    return;
                }
            }
            pinned.unit.take()
        };

        let pinned = match pinned {
            Some(path) => {
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    Some(path)
                } else {
                    debug!(connector = %self.id, file = %path.display(), "Pinned file vanished");
                    None
                }
            }
            None => None,
        };

        let file_path = match pinned {
            Some(path) => path,
            None => match self.file_cache.get_file_to_send().await {
                Ok(Some(path)) => {
                    self.pinned_file.lock().retry.reset();
                    path
                }
                Ok(None) => {
                    trace!(connector = %self.id, "No file to send");
                    return;
                }
                Err(e) => {
                    error!(connector = %self.id, error = %e, "Could not read file to send");
                    return;
                }
            },
        };

        debug!(connector = %self.id, file = %file_path.display(), "Sending file");
        let content = Content::Raw {
            file_path: file_path.clone(),
        };
        let result = self.deliver(&content).await;
        match result {
            Ok(()) => {
                self.file_cache.archive_or_remove_file(&file_path).await;
                metrics::record_file_sent(&self.id);
                let name = file_name(&file_path);
                self.metrics.update(|m| {
                    m.number_of_files_sent += 1;
                    m.last_file_sent = Some(name);
                });
                self.pinned_file.lock().retry.reset();
            }
            Err(e) => {
                let (decision, error_count) = {
                    let mut pinned = self.pinned_file.lock();
                    let decision = pinned.retry.record_failure(&policy, &e);
                    (decision, pinned.retry.error_count())
                };
                warn!(
                    connector = %self.id,
                    error = %e,
                    retry = e.retry,
                    error_count,
                    file = %file_path.display(),
                    "Error while sending file"
                );
                match decision {
                    RetryDecision::Retry => self.pinned_file.lock().unit = Some(file_path),
                    RetryDecision::Quarantine => {
                        self.file_cache.manage_errored_files(&file_path, error_count).await;
                        metrics::record_quarantine(&self.id, "raw");
                        self.pinned_file.lock().retry.reset();
                    }
                }
            }
        }
    }

    async fn deliver(&self, content: &Content) -> Result<(), DeliveryError> {
        let started = Instant::now();
        let result = self.destination.handle_content(content).await;
        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_delivery_latency(&self.id, content.kind(), started.elapsed());
        metrics::record_delivery(&self.id, content.kind(), status);
        result
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
