//! Connector lifecycle: start, stop, the trigger dispatcher and cache reset.

use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::{create_base_folders, CacheSignal, FileCacheSettings, ValueCacheSettings};
use crate::completion::Completion;
use crate::error::EngineError;
use crate::scheduler::TaskEntry;

use super::{ConnectorState, NorthOrchestrator, Receivers};

impl NorthOrchestrator {
    /// Start the connector.
    ///
    /// Startup flow:
    /// 1. Reload the connector and its subscriptions from the repository
    /// 2. Create the base folder, then rebuild the value and file caches from disk
    /// 3. Start the archive service and measure disk usage
    /// 4. Spawn the trigger dispatcher and install the scan-mode cron job
    /// 5. Connect to the destination
    ///
    /// A missing scan mode or a failed connection is logged and does not stop
    /// the start: data keeps accumulating in the cache.
    #[tracing::instrument(skip(self), fields(connector = %self.id))]
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        info!("Starting North connector...");
        self.set_state(ConnectorState::Starting);
        self.stopping.store(false, Ordering::Release);

        if let Err(e) = self.start_services().await {
            error!(error = %e, "North connector failed to start");
            self.archive.stop();
            self.file_cache.stop();
            self.value_cache.stop().await;
            self.set_state(ConnectorState::Stopped);
            return Err(e);
        }

        self.spawn_dispatcher();
        self.install_scan_mode();

        match self.destination.connect().await {
            Ok(()) => self.metrics.update(|m| m.last_connection = Some(Utc::now())),
            Err(e) => warn!(error = %e, retry = e.retry, "Connection failed, data stays in cache"),
        }

        self.set_state(ConnectorState::Idle);
        let (name, connector_type) = {
            let settings = self.settings.read();
            (settings.name.clone(), settings.connector_type.clone())
        };
        info!(name = %name, connector_type = %connector_type, "North connector started");
        Ok(())
    }

    async fn start_services(&self) -> Result<(), EngineError> {
        let connector = self
            .repository
            .find_connector_by_id(&self.id)
            .ok_or_else(|| EngineError::ConnectorNotFound(self.id.clone()))?;

        self.value_cache
            .update_settings(ValueCacheSettings::from_config(&self.engine_config, &connector.caching))
            .await;
        self.file_cache
            .update_settings(FileCacheSettings::from_config(&self.engine_config, &connector.caching));
        self.archive.update_settings(connector.caching.archive.clone());
        *self.settings.write() = connector;
        self.refresh_subscriptions();

        // The value index is rebuilt below, so units are pinned afresh
        self.pinned_values.lock().clear();
        self.pinned_file.lock().clear();

        create_base_folders(&[&self.base_folder]).await?;
        let values = self.value_cache.start().await?;
        let files = self.file_cache.start().await?;
        self.archive.start().await?;

        let usage = self.usage.recompute(&self.base_folder).await;
        self.metrics.set_usage(usage);
        debug!(values, files, cache_bytes = usage.total(), "Caches rebuilt from disk");
        Ok(())
    }

    fn install_scan_mode(&self) {
        let scan_mode_id = self.settings.read().caching.trigger.scan_mode_id.clone();
        match self.repository.find_scan_mode_by_id(&scan_mode_id) {
            // The scheduler logs invalid expressions itself
            Some(scan_mode) => {
                let _ = self.scheduler.create_cron_job(&scan_mode);
            }
            None => error!(
                connector = %self.id,
                error = %EngineError::ScanModeNotFound(scan_mode_id),
                "No cron job installed"
            ),
        }
    }

    /// Stop the connector.
    ///
    /// Waits for the in-flight run (never cancelled), then stops the cron
    /// jobs, the dispatcher and the caches, and disconnects. Queued data stays
    /// on disk for the next start.
    #[tracing::instrument(skip(self), fields(connector = %self.id))]
    pub async fn stop(&self) {
        let in_flight = {
            let slot = self.run_progress.lock();
            self.stopping.store(true, Ordering::Release);
            slot.clone()
        };
        self.set_state(ConnectorState::Stopping);
        debug!("Stopping North connector...");

        if let Some(completion) = in_flight {
            debug!("Waiting for North task to finish");
            completion.wait().await;
        }

        self.scheduler.stop();
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }
        self.archive.stop();
        self.file_cache.stop();
        self.value_cache.stop().await;

        if let Err(e) = self.destination.disconnect().await {
            error!(error = %e, "Error while disconnecting");
        }

        self.set_state(ConnectorState::Stopped);
        info!("North connector stopped");
    }

    /// Spawn the task turning scheduler and cache signals into runs.
    ///
    /// The dispatcher owns the receivers for as long as it runs; aborting it
    /// hands them back for the next start.
    pub(super) fn spawn_dispatcher(self: &Arc<Self>) {
        let receivers = Arc::clone(&self.receivers);
        let orchestrator = Arc::downgrade(self);
        let connector = self.id.clone();

        let handle = tokio::spawn(async move {
            let mut receivers = receivers.lock_owned().await;
            let Receivers { next, signals } = &mut *receivers;
            loop {
                let signal = tokio::select! {
                    Some(()) = next.recv() => None,
                    Some(signal) = signals.recv() => Some(signal),
                    else => break,
                };
                let Some(orchestrator) = orchestrator.upgrade() else {
                    break;
                };
                if let Some(signal) = signal {
                    orchestrator.on_cache_signal(signal);
                }
                orchestrator.try_begin_run();
            }
            debug!(connector = %connector, "Dispatcher exited");
        });

        if let Some(previous) = self.dispatcher.lock().replace(handle) {
            previous.abort();
        }
    }

    fn on_cache_signal(&self, signal: CacheSignal) {
        let entry = match signal {
            CacheSignal::ValuesReady => TaskEntry::ValueTrigger,
            CacheSignal::FilesReady => TaskEntry::FileTrigger,
        };
        self.scheduler.add_to_queue(entry);
    }

    /// Remove every queued and errored value and file.
    ///
    /// Waits for the in-flight run and keeps the run slot for itself, so no
    /// delivery starts halfway through. Each removal failure is logged and the
    /// reset goes on. The archive is kept.
    #[tracing::instrument(skip(self), fields(connector = %self.id))]
    pub async fn reset_cache(&self) {
        let claimed = self.claim_run_slot().await;

        self.pinned_values.lock().clear();
        self.pinned_file.lock().clear();

        if let Err(e) = self.value_cache.remove_all_error_values().await {
            error!(error = %e, "Error while removing error values");
        }
        if let Err(e) = self.value_cache.remove_all_values().await {
            error!(error = %e, "Error while removing cache values");
        }
        if let Err(e) = self.file_cache.remove_all_error_files().await {
            error!(error = %e, "Error while removing error files");
        }
        if let Err(e) = self.file_cache.remove_all_cache_files().await {
            error!(error = %e, "Error while removing cache files");
        }

        let usage = self.usage.recompute(&self.base_folder).await;
        self.metrics.set_usage(usage);
        info!("Cache reset");

        self.release_run_slot(&claimed);
    }

    /// Wait until no run holds the slot, then take it.
    async fn claim_run_slot(&self) -> Completion {
        loop {
            let current = {
                let mut slot = self.run_progress.lock();
                match slot.as_ref() {
                    Some(current) => current.clone(),
                    None => {
                        let claimed = Completion::new();
                        *slot = Some(claimed.clone());
                        return claimed;
                    }
                }
            };
            current.wait().await;
        }
    }

    pub(super) fn release_run_slot(&self, completion: &Completion) {
        self.run_progress.lock().take();
        completion.resolve();
        if !self.stopping.load(Ordering::Acquire) && !self.scheduler.queue().is_empty() {
            self.scheduler.queue().signal_next();
        }
    }
}
