//! Durable, ordered buffering of time values.
//!
//! Values move through three file stages inside `values/`:
//!
//! ```text
//! cache_values() → <id>.buffer.tmp ─flush→ <id>.queue.tmp ─compact→ <id>.compact.tmp
//! ```
//!
//! A chunk is on disk before [`ValueCache::cache_values`] returns, so a crash
//! at any point loses nothing: [`ValueCache::start`] rebuilds the index from
//! the folder and flushes recovered buffer files into the queue.
//!
//! Units handed out by [`ValueCache::get_values_to_send`] are never partially
//! consumed. They leave the cache whole, either removed after a successful
//! send or moved to `values-errors/`.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::fs::{self, CacheFileInfo, FileQuery, Page, VALUE_ERROR_FOLDER, VALUE_FOLDER};
use super::usage::{CacheArea, CacheUsage};
use super::{notify, CacheSignal};
use crate::batching::value_buffer::{BufferConfig, FlushReason, ValueBuffer};
use crate::config::{CachingSettings, EngineConfig};
use crate::error::EngineError;
use crate::model::TimeValue;

pub const BUFFER_SUFFIX: &str = "buffer.tmp";
pub const QUEUE_SUFFIX: &str = "queue.tmp";
pub const COMPACT_SUFFIX: &str = "compact.tmp";

/// Thresholds driving flush, compaction and run triggering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueCacheSettings {
    /// Queued values that trigger a run
    pub group_count: usize,
    /// Queued values that trigger compaction
    pub max_send_count: usize,
    pub buffer_max: usize,
    pub buffer_timeout: Duration,
}

impl ValueCacheSettings {
    #[must_use]
    pub fn from_config(engine: &EngineConfig, caching: &CachingSettings) -> Self {
        Self {
            group_count: caching.trigger.number_of_elements,
            max_send_count: caching.throttling.max_number_of_elements,
            buffer_max: engine.buffer_max,
            buffer_timeout: engine.buffer_timeout(),
        }
    }

    fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            buffer_max: self.buffer_max,
            group_count: self.group_count,
        }
    }
}

impl Default for ValueCacheSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default(), &CachingSettings::default())
    }
}

/// One deliverable unit: the files it came from and their values, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueUnit {
    pub keys: Vec<String>,
    pub values: Vec<TimeValue>,
}

impl ValueUnit {
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Buffer,
    Queue,
    Compacted,
}

impl Stage {
    fn of(name: &str) -> Option<Self> {
        if name.ends_with(BUFFER_SUFFIX) {
            Some(Self::Buffer)
        } else if name.ends_with(QUEUE_SUFFIX) {
            Some(Self::Queue)
        } else if name.ends_with(COMPACT_SUFFIX) {
            Some(Self::Compacted)
        } else {
            None
        }
    }
}

/// File name → value count, per stage. Names sort in creation order.
#[derive(Debug, Default)]
struct ValueIndex {
    buffer: ValueBuffer,
    queue: BTreeMap<String, usize>,
    compacted: BTreeMap<String, usize>,
    /// Keys of the unit handed out and not yet removed or quarantined.
    /// Compaction leaves them alone.
    sending: BTreeSet<String>,
}

impl ValueIndex {
    fn queue_count(&self) -> usize {
        self.queue.values().sum()
    }

    fn compacted_count(&self) -> usize {
        self.compacted.values().sum()
    }

    fn forget(&mut self, key: &str) -> bool {
        self.sending.remove(key);
        self.queue.remove(key).is_some() || self.compacted.remove(key).is_some()
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.queue.clear();
        self.compacted.clear();
        self.sending.clear();
    }
}

pub struct ValueCache {
    connector_id: String,
    folder: PathBuf,
    error_folder: PathBuf,
    settings: Mutex<ValueCacheSettings>,
    /// Held for the whole of a flush, so flushes never overlap
    index: AsyncMutex<ValueIndex>,
    usage: Arc<CacheUsage>,
    signals: mpsc::Sender<CacheSignal>,
    flush_timer: Mutex<Option<JoinHandle<()>>>,
    stopping: AtomicBool,
}

impl ValueCache {
    pub fn new(
        connector_id: impl Into<String>,
        base_folder: &Path,
        settings: ValueCacheSettings,
        usage: Arc<CacheUsage>,
        signals: mpsc::Sender<CacheSignal>,
    ) -> Self {
        Self {
            connector_id: connector_id.into(),
            folder: base_folder.join(VALUE_FOLDER),
            error_folder: base_folder.join(VALUE_ERROR_FOLDER),
            settings: Mutex::new(settings),
            index: AsyncMutex::new(ValueIndex {
                buffer: ValueBuffer::new(settings.buffer_config()),
                ..Default::default()
            }),
            usage,
            signals,
            flush_timer: Mutex::new(None),
            stopping: AtomicBool::new(false),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn error_folder(&self) -> &Path {
        &self.error_folder
    }

    pub fn settings(&self) -> ValueCacheSettings {
        *self.settings.lock()
    }

    pub async fn update_settings(&self, settings: ValueCacheSettings) {
        *self.settings.lock() = settings;
        self.index.lock().await.buffer.set_config(settings.buffer_config());
    }

    /// Create the folders and rebuild the index from disk.
    ///
    /// Returns the number of values recovered. Unreadable files are logged and
    /// left where they are.
    #[tracing::instrument(skip(self), fields(connector = %self.connector_id))]
    pub async fn start(&self) -> Result<usize, EngineError> {
        fs::create_base_folders(&[&self.folder, &self.error_folder]).await?;
        self.stopping.store(false, Ordering::Release);

        let mut index = self.index.lock().await;
        index.clear();
        index.buffer.set_config(self.settings().buffer_config());

        for name in fs::file_names(&self.folder).await? {
            let Some(stage) = Stage::of(&name) else {
                debug!(file = %name, "Ignoring unknown file in value cache");
                continue;
            };
            let path = self.folder.join(&name);
            let count = match read_values(&path).await {
                Ok(values) => values.len(),
                Err(e) => {
                    error!(error = %e, "Skipping unreadable value file");
                    continue;
                }
            };
            match stage {
                Stage::Buffer => index.buffer.restore(name, count),
                Stage::Queue => {
                    index.queue.insert(name, count);
                }
                Stage::Compacted => {
                    index.compacted.insert(name, count);
                }
            }
        }

        let buffered = index.buffer.len();
        let queued = index.queue_count();
        let compacted = index.compacted_count();
        drop(index);

        info!(buffered, queued, compacted, "Value cache started");

        if buffered > 0 {
            self.flush(FlushReason::Recovery).await?;
        } else if queued > 0 && queued >= self.settings().group_count {
            notify(&self.signals, CacheSignal::ValuesReady, &self.connector_id);
        }
        Ok(buffered + queued + compacted)
    }

    /// Cancel the flush timer and wait for an in-progress flush.
    ///
    /// Buffer files stay on disk and are recovered by the next start.
    #[tracing::instrument(skip(self), fields(connector = %self.connector_id))]
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        if let Some(timer) = self.flush_timer.lock().take() {
            timer.abort();
        }
        let _index = self.index.lock().await;
        debug!("Value cache stopped");
    }

    /// Persist one chunk as a buffer file, then flush now or arm the timer.
    pub async fn cache_values(self: &Arc<Self>, values: &[TimeValue]) -> Result<(), EngineError> {
        if values.is_empty() {
            return Ok(());
        }
        let name = fs::unique_name(BUFFER_SUFFIX);
        let path = self.folder.join(&name);
        let size = write_values(&path, values).await?;
        self.usage.add(CacheArea::Cache, size);
        trace!(connector = %self.connector_id, file = %name, count = values.len(), "Values buffered");

        let reason = {
            let mut index = self.index.lock().await;
            let queued = index.queue_count();
            index.buffer.push(name, values.len(), queued)
        };

        match reason {
            Some(reason) => {
                if let Some(timer) = self.flush_timer.lock().take() {
                    timer.abort();
                }
                if let Err(e) = self.flush(reason).await {
                    error!(connector = %self.connector_id, error = %e, "Flush failed, buffer files kept");
                }
            }
            None => self.arm_flush_timer(),
        }
        Ok(())
    }

    fn arm_flush_timer(self: &Arc<Self>) {
        let mut timer = self.flush_timer.lock();
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let cache = Arc::clone(self);
        let delay = self.settings().buffer_timeout;
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detach before flushing so values cached meanwhile can arm a new timer
            drop(cache.flush_timer.lock().take());
            if let Err(e) = cache.flush(FlushReason::Time).await {
                error!(connector = %cache.connector_id, error = %e, "Timed flush failed, buffer files kept");
            }
        }));
    }

    /// Merge every buffer file into one queue file.
    ///
    /// Compacts when the queue reaches the max send count and signals the
    /// orchestrator when it reaches the group count. On a write failure the
    /// buffer files are kept and the error returned. Unreadable buffer files
    /// go to the error folder.
    pub async fn flush(&self, reason: FlushReason) -> Result<(), EngineError> {
        let mut index = self.index.lock().await;
        if reason == FlushReason::Time && self.stopping.load(Ordering::Acquire) {
            return Ok(());
        }
        if index.buffer.is_empty() {
            trace!(connector = %self.connector_id, reason = reason.as_str(), "Nothing to flush");
            return Ok(());
        }

        let entries = index.buffer.take();
        let mut values = Vec::new();
        let mut merged = Vec::with_capacity(entries.len());
        for entry in &entries {
            match read_values(&self.folder.join(&entry.name)).await {
                Ok(chunk) => {
                    values.extend(chunk);
                    merged.push(entry.name.as_str());
                }
                Err(e) if e.is_not_found() => {
                    warn!(connector = %self.connector_id, file = %entry.name, "Buffer file vanished");
                }
                Err(e) => {
                    error!(connector = %self.connector_id, error = %e, "Buffer file unreadable, moving it to errors");
                    self.quarantine(&entry.name).await;
                }
            }
        }
        if values.is_empty() {
            return Ok(());
        }

        let queue_name = fs::unique_name(QUEUE_SUFFIX);
        let queue_path = self.folder.join(&queue_name);
        match write_values(&queue_path, &values).await {
            Ok(size) => self.usage.add(CacheArea::Cache, size),
            Err(e) => {
                index.buffer.restore_front(entries);
                return Err(e);
            }
        }

        for name in merged {
            match fs::remove_file(&self.folder.join(name)).await {
                Ok(freed) => self.usage.sub(CacheArea::Cache, freed),
                Err(e) => error!(connector = %self.connector_id, error = %e, "Error while removing buffer file"),
            }
        }

        let flushed = values.len();
        index.queue.insert(queue_name.clone(), flushed);
        let queued = index.queue_count();
        debug!(
            connector = %self.connector_id,
            reason = reason.as_str(),
            flushed,
            queued,
            file = %queue_name,
            "Buffer flushed into queue"
        );
        crate::metrics::record_flush(&self.connector_id, reason.as_str(), flushed);

        let settings = self.settings();
        if queued >= settings.max_send_count {
            if let Err(e) = self.compact(&mut index).await {
                error!(connector = %self.connector_id, error = %e, "Compaction failed, queue files kept");
            }
        }
        drop(index);

        if queued >= settings.group_count {
            notify(&self.signals, CacheSignal::ValuesReady, &self.connector_id);
        }
        Ok(())
    }

    /// Merge the queue files into one compacted file, except those of the
    /// unit being sent.
    async fn compact(&self, index: &mut ValueIndex) -> Result<(), EngineError> {
        let mut values = Vec::new();
        let mut merged = Vec::new();
        for name in index.queue.keys().filter(|name| !index.sending.contains(*name)) {
            match read_values(&self.folder.join(name)).await {
                Ok(chunk) => {
                    values.extend(chunk);
                    merged.push(name.clone());
                }
                Err(e) => error!(connector = %self.connector_id, error = %e, "Queue file unreadable, not compacted"),
            }
        }
        if values.is_empty() {
            return Ok(());
        }

        let compact_name = fs::unique_name(COMPACT_SUFFIX);
        let size = write_values(&self.folder.join(&compact_name), &values).await?;
        self.usage.add(CacheArea::Cache, size);

        for name in &merged {
            index.queue.remove(name);
            match fs::remove_file(&self.folder.join(name)).await {
                Ok(freed) => self.usage.sub(CacheArea::Cache, freed),
                Err(e) => error!(connector = %self.connector_id, error = %e, "Error while removing compacted queue file"),
            }
        }
        info!(
            connector = %self.connector_id,
            files = merged.len(),
            count = values.len(),
            file = %compact_name,
            "Queue compacted"
        );
        index.compacted.insert(compact_name, values.len());
        Ok(())
    }

    /// Oldest unit to send: the first compacted file, otherwise every queue
    /// file. Nothing is removed; the unit's keys stay out of compaction until
    /// [`remove_sent_values`](Self::remove_sent_values) or
    /// [`manage_errored_values`](Self::manage_errored_values) releases them.
    ///
    /// A file that can no longer be parsed would block the queue forever, so
    /// it is moved to the error folder.
    pub async fn get_values_to_send(&self) -> Result<Option<ValueUnit>, EngineError> {
        let mut index = self.index.lock().await;

        while let Some(name) = index.compacted.keys().next().cloned() {
            match read_values(&self.folder.join(&name)).await {
                Ok(values) => {
                    index.sending.insert(name.clone());
                    return Ok(Some(ValueUnit {
                        keys: vec![name],
                        values,
                    }));
                }
                Err(e) => {
                    error!(connector = %self.connector_id, error = %e, "Compacted file unreadable, moving it to errors");
                    index.compacted.remove(&name);
                    self.quarantine(&name).await;
                }
            }
        }

        let mut unit = ValueUnit {
            keys: Vec::new(),
            values: Vec::new(),
        };
        let names: Vec<String> = index.queue.keys().cloned().collect();
        for name in names {
            match read_values(&self.folder.join(&name)).await {
                Ok(values) => {
                    unit.values.extend(values);
                    unit.keys.push(name);
                }
                Err(e) if e.is_not_found() => {
                    warn!(connector = %self.connector_id, file = %name, "Queue file vanished");
                    index.queue.remove(&name);
                }
                Err(e) => {
                    error!(connector = %self.connector_id, error = %e, "Queue file unreadable, moving it to errors");
                    index.queue.remove(&name);
                    self.quarantine(&name).await;
                }
            }
        }
        if unit.keys.is_empty() {
            return Ok(None);
        }
        index.sending.extend(unit.keys.iter().cloned());
        Ok(Some(unit))
    }

    /// Delete the files of a successfully sent unit. Unknown keys are ignored.
    pub async fn remove_sent_values(&self, keys: &[String]) {
        let mut index = self.index.lock().await;
        for key in keys {
            if !index.forget(key) {
                debug!(connector = %self.connector_id, file = %key, "Sent values already removed from cache");
            }
            match fs::remove_file(&self.folder.join(key)).await {
                Ok(freed) => self.usage.sub(CacheArea::Cache, freed),
                Err(e) => error!(connector = %self.connector_id, error = %e, "Error while removing sent values"),
            }
        }
    }

    /// Move the files of a unit that exhausted its retries to the error folder.
    pub async fn manage_errored_values(&self, keys: &[String], error_count: u32) {
        let mut index = self.index.lock().await;
        for key in keys {
            index.forget(key);
            warn!(
                connector = %self.connector_id,
                file = %key,
                error_count,
                "Values moved to error folder after too many failures"
            );
            self.quarantine(key).await;
        }
    }

    async fn quarantine(&self, name: &str) {
        let from = self.folder.join(name);
        let to = self.error_folder.join(name);
        match fs::move_file(&from, &to).await {
            Ok(size) => self.usage.transfer(CacheArea::Cache, CacheArea::Error, size),
            Err(e) if e.is_not_found() => {
                debug!(connector = %self.connector_id, file = %name, "Value file already gone")
            }
            Err(e) => error!(connector = %self.connector_id, error = %e, "Error while moving values to error folder"),
        }
    }

    /// No buffered, queued or compacted values.
    pub async fn is_empty(&self) -> bool {
        let index = self.index.lock().await;
        index.buffer.is_empty() && index.queue.is_empty() && index.compacted.is_empty()
    }

    /// Values currently waiting (buffered + queued + compacted).
    pub async fn len(&self) -> usize {
        let index = self.index.lock().await;
        index.buffer.len() + index.queue_count() + index.compacted_count()
    }

    pub async fn queued_files(&self, query: &FileQuery) -> Result<Page<CacheFileInfo>, EngineError> {
        fs::list_files(&self.folder, query).await
    }

    pub async fn queued_file_content(&self, name: &str) -> Result<Vec<TimeValue>, EngineError> {
        let name = fs::checked_file_name(name)?;
        read_values(&self.folder.join(name)).await
    }

    /// Operator removal of queued files. Missing names are ignored.
    pub async fn remove_queued_values(&self, names: &[String]) -> Result<(), EngineError> {
        for name in names {
            fs::checked_file_name(name)?;
        }
        let mut index = self.index.lock().await;
        for name in names {
            index.forget(name);
            if index.buffer.entries().iter().any(|e| &e.name == name) {
                let kept = index
                    .buffer
                    .take()
                    .into_iter()
                    .filter(|e| &e.name != name)
                    .collect();
                index.buffer.restore_front(kept);
            }
            let freed = fs::remove_file(&self.folder.join(name)).await?;
            self.usage.sub(CacheArea::Cache, freed);
            info!(connector = %self.connector_id, file = %name, "Queued values removed");
        }
        Ok(())
    }

    /// Drop every buffered, queued and compacted value.
    pub async fn remove_all_values(&self) -> Result<(), EngineError> {
        let mut index = self.index.lock().await;
        let mut removed = 0;
        for name in fs::file_names(&self.folder).await? {
            let freed = fs::remove_file(&self.folder.join(&name)).await?;
            self.usage.sub(CacheArea::Cache, freed);
            removed += 1;
        }
        index.clear();
        info!(connector = %self.connector_id, removed, "All cached values removed");
        Ok(())
    }

    pub async fn error_files(&self, query: &FileQuery) -> Result<Page<CacheFileInfo>, EngineError> {
        fs::list_files(&self.error_folder, query).await
    }

    pub async fn error_file_content(&self, name: &str) -> Result<Vec<TimeValue>, EngineError> {
        let name = fs::checked_file_name(name)?;
        read_values(&self.error_folder.join(name)).await
    }

    pub async fn remove_error_values(&self, names: &[String]) -> Result<(), EngineError> {
        for name in names {
            let name = fs::checked_file_name(name)?;
            let freed = fs::remove_file(&self.error_folder.join(name)).await?;
            self.usage.sub(CacheArea::Error, freed);
            info!(connector = %self.connector_id, file = %name, "Errored values removed");
        }
        Ok(())
    }

    pub async fn remove_all_error_values(&self) -> Result<(), EngineError> {
        let names = fs::file_names(&self.error_folder).await?;
        self.remove_error_values(&names).await
    }

    /// Move errored files back into the queue. They keep their name, so a
    /// retried file is sent before anything cached after it.
    pub async fn retry_error_values(&self, names: &[String]) -> Result<(), EngineError> {
        for name in names {
            fs::checked_file_name(name)?;
        }
        let mut index = self.index.lock().await;
        for name in names {
            let from = self.error_folder.join(name);
            let count = match read_values(&from).await {
                Ok(values) => values.len(),
                Err(e) => {
                    error!(connector = %self.connector_id, error = %e, "Errored values unreadable, not retried");
                    continue;
                }
            };
            let size = fs::move_file(&from, &self.folder.join(name)).await?;
            self.usage.transfer(CacheArea::Error, CacheArea::Cache, size);
            if Stage::of(name) == Some(Stage::Compacted) {
                index.compacted.insert(name.clone(), count);
            } else {
                index.queue.insert(name.clone(), count);
            }
            info!(connector = %self.connector_id, file = %name, count, "Errored values moved back to queue");
        }
        Ok(())
    }

    pub async fn retry_all_error_values(&self) -> Result<(), EngineError> {
        let names = fs::file_names(&self.error_folder).await?;
        self.retry_error_values(&names).await
    }
}

async fn read_values(path: &Path) -> Result<Vec<TimeValue>, EngineError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| EngineError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| EngineError::json(path, e))
}

async fn write_values(path: &Path, values: &[TimeValue]) -> Result<u64, EngineError> {
    let bytes = serde_json::to_vec(values).map_err(|e| EngineError::json(path, e))?;
    tokio::fs::write(path, &bytes)
        .await
        .map_err(|e| EngineError::io(path, e))?;
    Ok(bytes.len() as u64)
}
