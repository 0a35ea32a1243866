//! Durable FIFO queue of whole files.
//!
//! Files are copied into `files/` under a collision-free name and sent one at
//! a time, oldest first. Ordering is recomputed from `stat` on every call, so
//! files added or removed behind the engine's back are picked up.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::archive::ArchiveService;
use super::fs::{self, CacheFileInfo, FileQuery, Page, FILE_ERROR_FOLDER, FILE_FOLDER};
use super::usage::{CacheArea, CacheUsage};
use super::{notify, CacheSignal, FIRST_SWEEP_DELAY};
use crate::config::{CachingSettings, EngineConfig};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileCacheSettings {
    /// Queued files that trigger a run (0 = disabled)
    pub group_count: usize,
    /// Errored files older than this are removed by the sweep
    pub error_retention: Option<Duration>,
    pub sweep_interval: Duration,
}

impl FileCacheSettings {
    #[must_use]
    pub fn from_config(engine: &EngineConfig, caching: &CachingSettings) -> Self {
        Self {
            group_count: caching.trigger.number_of_files,
            error_retention: caching.error.retention(),
            sweep_interval: engine.sweep_interval(),
        }
    }
}

impl Default for FileCacheSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default(), &CachingSettings::default())
    }
}

pub struct FileCache {
    connector_id: String,
    folder: PathBuf,
    error_folder: PathBuf,
    settings: Mutex<FileCacheSettings>,
    archive: Arc<ArchiveService>,
    usage: Arc<CacheUsage>,
    signals: mpsc::Sender<CacheSignal>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl FileCache {
    pub fn new(
        connector_id: impl Into<String>,
        base_folder: &Path,
        settings: FileCacheSettings,
        archive: Arc<ArchiveService>,
        usage: Arc<CacheUsage>,
        signals: mpsc::Sender<CacheSignal>,
    ) -> Self {
        Self {
            connector_id: connector_id.into(),
            folder: base_folder.join(FILE_FOLDER),
            error_folder: base_folder.join(FILE_ERROR_FOLDER),
            settings: Mutex::new(settings),
            archive,
            usage,
            signals,
            sweep_task: Mutex::new(None),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn error_folder(&self) -> &Path {
        &self.error_folder
    }

    pub fn archive(&self) -> &Arc<ArchiveService> {
        &self.archive
    }

    pub fn update_settings(&self, settings: FileCacheSettings) {
        *self.settings.lock() = settings;
    }

    /// Create the folders, report what is queued and start the error sweep.
    ///
    /// Returns the number of files waiting in `files/`.
    #[tracing::instrument(skip(self), fields(connector = %self.connector_id))]
    pub async fn start(self: &Arc<Self>) -> Result<usize, EngineError> {
        fs::create_base_folders(&[&self.folder, &self.error_folder]).await?;
        let queued = fs::read_files(&self.folder).await?.len();
        let errored = fs::read_files(&self.error_folder).await?.len();
        info!(queued, errored, "File cache started");

        let settings = *self.settings.lock();
        if settings.group_count > 0 && queued >= settings.group_count {
            notify(&self.signals, CacheSignal::FilesReady, &self.connector_id);
        }

        self.stop();
        if settings.error_retention.is_some() {
            let cache = Arc::downgrade(self);
            *self.sweep_task.lock() = Some(tokio::spawn(async move {
                let mut delay = FIRST_SWEEP_DELAY.min(settings.sweep_interval);
                loop {
                    tokio::time::sleep(delay).await;
                    let Some(cache) = cache.upgrade() else {
                        return;
                    };
                    cache.refresh_error_folder().await;
                    delay = settings.sweep_interval;
                }
            }));
        }
        Ok(queued)
    }

    pub fn stop(&self) {
        if let Some(task) = self.sweep_task.lock().take() {
            task.abort();
        }
    }

    /// Copy `source` into the queue. Returns the cached copy's path.
    pub async fn cache_file(&self, source: &Path) -> Result<PathBuf, EngineError> {
        let target = self.unique_target(source).await?;
        let size = tokio::fs::copy(source, &target)
            .await
            .map_err(|e| EngineError::io(source, e))?;
        self.usage.add(CacheArea::Cache, size);
        debug!(
            connector = %self.connector_id,
            source = %source.display(),
            target = %target.display(),
            "File cached"
        );

        let group_count = self.settings.lock().group_count;
        if group_count > 0 {
            let queued = fs::read_files(&self.folder).await?.len();
            if queued >= group_count {
                notify(&self.signals, CacheSignal::FilesReady, &self.connector_id);
            }
        }
        Ok(target)
    }

    /// `<stem>-<micros><ext>`, with a counter appended on the rare clash
    async fn unique_target(&self, source: &Path) -> Result<PathBuf, EngineError> {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| EngineError::InvalidFileName(source.display().to_string()))?;
        let ext = source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let micros = fs::monotonic_micros();

        let mut candidate = self.folder.join(format!("{stem}-{micros}{ext}"));
        let mut counter = 1;
        while tokio::fs::try_exists(&candidate)
            .await
            .map_err(|e| EngineError::io(&candidate, e))?
        {
            candidate = self.folder.join(format!("{stem}-{micros}-{counter}{ext}"));
            counter += 1;
        }
        Ok(candidate)
    }

    /// Oldest queued file by creation time (modification time where the
    /// platform has none), ties broken by name.
    pub async fn get_file_to_send(&self) -> Result<Option<PathBuf>, EngineError> {
        let oldest = fs::read_files(&self.folder)
            .await?
            .into_iter()
            .min_by(|(a_path, a_meta), (b_path, b_meta)| {
                fs::creation_time(a_meta)
                    .cmp(&fs::creation_time(b_meta))
                    .then_with(|| a_path.cmp(b_path))
            })
            .map(|(path, _)| path);
        Ok(oldest)
    }

    /// Hand a successfully sent file to the archive service.
    pub async fn archive_or_remove_file(&self, path: &Path) {
        self.archive.archive_or_remove_file(path).await;
    }

    /// Move a file that exhausted its retries to the error folder.
    pub async fn manage_errored_files(&self, path: &Path, error_count: u32) {
        let Some(name) = path.file_name() else {
            error!(connector = %self.connector_id, path = %path.display(), "Cannot quarantine a path without file name");
            return;
        };
        match fs::move_file(path, &self.error_folder.join(name)).await {
            Ok(size) => {
                self.usage.transfer(CacheArea::Cache, CacheArea::Error, size);
                warn!(
                    connector = %self.connector_id,
                    file = %path.display(),
                    error_count,
                    "File moved to error folder after too many failures"
                );
            }
            Err(e) if e.is_not_found() => {
                debug!(connector = %self.connector_id, file = %path.display(), "Errored file already gone")
            }
            Err(e) => error!(connector = %self.connector_id, error = %e, "Error while moving file to error folder"),
        }
    }

    pub async fn is_empty(&self) -> bool {
        fs::is_folder_empty(&self.folder).await
    }

    pub async fn queued_files(&self, query: &FileQuery) -> Result<Page<CacheFileInfo>, EngineError> {
        fs::list_files(&self.folder, query).await
    }

    pub async fn queued_file_content(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        read_checked(&self.folder, name).await
    }

    pub async fn remove_queued_files(&self, names: &[String]) -> Result<(), EngineError> {
        self.remove_from(&self.folder, CacheArea::Cache, names).await
    }

    pub async fn remove_all_cache_files(&self) -> Result<(), EngineError> {
        let names = fs::file_names(&self.folder).await?;
        self.remove_queued_files(&names).await
    }

    /// Move queued files straight to the archive (or delete them when
    /// archiving is off), without sending them.
    pub async fn archive_queued_files(&self, names: &[String]) -> Result<(), EngineError> {
        for name in names {
            let name = fs::checked_file_name(name)?;
            self.archive.archive_or_remove_file(&self.folder.join(name)).await;
        }
        Ok(())
    }

    pub async fn error_files(&self, query: &FileQuery) -> Result<Page<CacheFileInfo>, EngineError> {
        fs::list_files(&self.error_folder, query).await
    }

    pub async fn error_file_content(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        read_checked(&self.error_folder, name).await
    }

    pub async fn remove_error_files(&self, names: &[String]) -> Result<(), EngineError> {
        self.remove_from(&self.error_folder, CacheArea::Error, names).await
    }

    pub async fn remove_all_error_files(&self) -> Result<(), EngineError> {
        let names = fs::file_names(&self.error_folder).await?;
        self.remove_error_files(&names).await
    }

    /// Move errored files back into the queue for another round of attempts.
    pub async fn retry_error_files(&self, names: &[String]) -> Result<(), EngineError> {
        for name in names {
            let name = fs::checked_file_name(name)?;
            let size = fs::move_file(&self.error_folder.join(name), &self.folder.join(name)).await?;
            self.usage.transfer(CacheArea::Error, CacheArea::Cache, size);
            info!(connector = %self.connector_id, file = %name, "Errored file moved back to cache");
        }
        Ok(())
    }

    pub async fn retry_all_error_files(&self) -> Result<(), EngineError> {
        let names = fs::file_names(&self.error_folder).await?;
        self.retry_error_files(&names).await
    }

    /// Put archived files back into the queue to send them again.
    pub async fn retry_archive_files(&self, names: &[String]) -> Result<(), EngineError> {
        let archive_folder = self.archive.folder();
        for name in names {
            let name = fs::checked_file_name(name)?;
            let size = fs::move_file(&archive_folder.join(name), &self.folder.join(name)).await?;
            self.usage.transfer(CacheArea::Archive, CacheArea::Cache, size);
            info!(connector = %self.connector_id, file = %name, "Archived file moved back to cache");
        }
        Ok(())
    }

    pub async fn retry_all_archive_files(&self) -> Result<(), EngineError> {
        let names = fs::file_names(self.archive.folder()).await?;
        self.retry_archive_files(&names).await
    }

    /// Error-folder retention sweep against the wall clock.
    pub async fn refresh_error_folder(&self) -> usize {
        self.refresh_error_folder_at(SystemTime::now()).await
    }

    pub async fn refresh_error_folder_at(&self, now: SystemTime) -> usize {
        let Some(retention) = self.settings.lock().error_retention else {
            return 0;
        };
        let (removed, freed) = fs::remove_expired_files(&self.error_folder, retention, now).await;
        self.usage.sub(CacheArea::Error, freed);
        if removed > 0 {
            info!(connector = %self.connector_id, removed, freed_bytes = freed, "Expired errored files removed");
            crate::metrics::record_files_expired(&self.connector_id, "error", removed);
        }
        removed
    }

    async fn remove_from(&self, folder: &Path, area: CacheArea, names: &[String]) -> Result<(), EngineError> {
        for name in names {
            let name = fs::checked_file_name(name)?;
            let freed = fs::remove_file(&folder.join(name)).await?;
            self.usage.sub(area, freed);
            info!(connector = %self.connector_id, file = %name, "Cache file removed");
        }
        Ok(())
    }
}

impl Drop for FileCache {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn read_checked(folder: &Path, name: &str) -> Result<Vec<u8>, EngineError> {
    let name = fs::checked_file_name(name)?;
    let path = folder.join(name);
    tokio::fs::read(&path).await.map_err(|e| EngineError::io(path, e))
}
