//! Post-delivery retention of raw files.
//!
//! After a confirmed send the file cache hands the file here. With archiving
//! enabled it is renamed into `archive/` and kept until its modification time
//! plus the retention period has passed; otherwise it is deleted. Neither path
//! returns an error to the send loop.
//!
//! The retention sweep re-arms itself only after the previous sweep finished,
//! so a slow disk can never stack sweeps.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::fs::{self, CacheFileInfo, FileQuery, Page, ARCHIVE_FOLDER};
use super::usage::{CacheArea, CacheUsage};
use super::FIRST_SWEEP_DELAY;
use crate::config::ArchiveSettings;
use crate::error::EngineError;

pub struct ArchiveService {
    connector_id: String,
    folder: PathBuf,
    settings: Mutex<ArchiveSettings>,
    sweep_interval: Duration,
    usage: Arc<CacheUsage>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl ArchiveService {
    pub fn new(
        connector_id: impl Into<String>,
        base_folder: &Path,
        settings: ArchiveSettings,
        sweep_interval: Duration,
        usage: Arc<CacheUsage>,
    ) -> Self {
        Self {
            connector_id: connector_id.into(),
            folder: base_folder.join(ARCHIVE_FOLDER),
            settings: Mutex::new(settings),
            sweep_interval,
            usage,
            sweep_task: Mutex::new(None),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn settings(&self) -> ArchiveSettings {
        self.settings.lock().clone()
    }

    /// New settings apply to the next `start()`.
    pub fn update_settings(&self, settings: ArchiveSettings) {
        *self.settings.lock() = settings;
    }

    /// Create `archive/` and, when archiving with a retention period, spawn the
    /// retention sweep.
    #[tracing::instrument(skip(self), fields(connector = %self.connector_id))]
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        fs::create_base_folders(&[&self.folder]).await?;
        self.stop();

        let settings = self.settings();
        let Some(retention) = settings.retention().filter(|_| settings.enabled) else {
            debug!(enabled = settings.enabled, "Archive retention sweep disabled");
            return Ok(());
        };

        let service = Arc::downgrade(self);
        let interval = self.sweep_interval;
        *self.sweep_task.lock() = Some(tokio::spawn(async move {
            let mut delay = FIRST_SWEEP_DELAY.min(interval);
            loop {
                tokio::time::sleep(delay).await;
                let Some(service) = service.upgrade() else {
                    return;
                };
                service.refresh_archive_folder().await;
                delay = interval;
            }
        }));
        info!(retention_hours = retention.as_secs() / 3600, "Archive retention sweep started");
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(task) = self.sweep_task.lock().take() {
            task.abort();
        }
    }

    /// Archive (enabled) or delete (disabled) a file that left the cache
    /// folder after a successful send. Failures are logged only.
    pub async fn archive_or_remove_file(&self, path: &Path) {
        if self.settings.lock().enabled {
            let Some(name) = path.file_name() else {
                error!(connector = %self.connector_id, path = %path.display(), "Cannot archive a path without file name");
                return;
            };
            let target = self.folder.join(name);
            match fs::move_file(path, &target).await {
                Ok(size) => {
                    self.usage.transfer(CacheArea::Cache, CacheArea::Archive, size);
                    debug!(connector = %self.connector_id, file = %target.display(), "File archived");
                }
                Err(e) => error!(connector = %self.connector_id, error = %e, "Error while archiving file"),
            }
        } else {
            match fs::remove_file(path).await {
                Ok(freed) => {
                    self.usage.sub(CacheArea::Cache, freed);
                    debug!(connector = %self.connector_id, file = %path.display(), "File removed");
                }
                Err(e) => error!(connector = %self.connector_id, error = %e, "Error while removing file"),
            }
        }
    }

    /// Retention sweep against the wall clock.
    pub async fn refresh_archive_folder(&self) -> usize {
        self.refresh_archive_folder_at(SystemTime::now()).await
    }

    /// Retention sweep as if the current time were `now`.
    ///
    /// Returns the number of files removed. Zero retention keeps everything.
    pub async fn refresh_archive_folder_at(&self, now: SystemTime) -> usize {
        let Some(retention) = self.settings.lock().retention() else {
            return 0;
        };
        debug!(connector = %self.connector_id, "Parse archive folder to remove old files");
        let (removed, freed) = fs::remove_expired_files(&self.folder, retention, now).await;
        self.usage.sub(CacheArea::Archive, freed);
        if removed > 0 {
            info!(connector = %self.connector_id, removed, freed_bytes = freed, "Expired archive files removed");
            crate::metrics::record_files_expired(&self.connector_id, "archive", removed);
        }
        removed
    }

    pub async fn archive_files(&self, query: &FileQuery) -> Result<Page<CacheFileInfo>, EngineError> {
        fs::list_files(&self.folder, query).await
    }

    pub async fn archive_file_content(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        let name = fs::checked_file_name(name)?;
        let path = self.folder.join(name);
        tokio::fs::read(&path).await.map_err(|e| EngineError::io(path, e))
    }

    pub async fn remove_files(&self, names: &[String]) -> Result<(), EngineError> {
        for name in names {
            let name = fs::checked_file_name(name)?;
            let freed = fs::remove_file(&self.folder.join(name)).await?;
            self.usage.sub(CacheArea::Archive, freed);
            info!(connector = %self.connector_id, file = %name, "Archive file removed");
        }
        Ok(())
    }

    pub async fn remove_all_archive_files(&self) -> Result<(), EngineError> {
        let names = fs::file_names(&self.folder).await?;
        self.remove_files(&names).await
    }
}

impl Drop for ArchiveService {
    fn drop(&mut self) {
        self.stop();
    }
}
