//! Operator surface: list, read, remove and retry cached content.
//!
//! Every call delegates to the owning cache and refreshes the published disk
//! usage when it changes something.

use tracing::trace;

use crate::cache::{CacheFileInfo, FileQuery, Page};
use crate::error::EngineError;
use crate::model::TimeValue;

use super::NorthOrchestrator;

impl NorthOrchestrator {
    // ========== Queued values ==========

    pub async fn cache_value_files(&self, query: &FileQuery) -> Result<Page<CacheFileInfo>, EngineError> {
        self.value_cache.queued_files(query).await
    }

    pub async fn cache_value_content(&self, name: &str) -> Result<Vec<TimeValue>, EngineError> {
        self.value_cache.queued_file_content(name).await
    }

    pub async fn remove_cache_values(&self, names: &[String]) -> Result<(), EngineError> {
        trace!(connector = %self.id, count = names.len(), "Removing queued value files");
        let result = self.value_cache.remove_queued_values(names).await;
        self.publish_usage();
        result
    }

    pub async fn remove_all_cache_values(&self) -> Result<(), EngineError> {
        let result = self.value_cache.remove_all_values().await;
        self.publish_usage();
        result
    }

    // ========== Errored values ==========

    pub async fn value_error_files(&self, query: &FileQuery) -> Result<Page<CacheFileInfo>, EngineError> {
        self.value_cache.error_files(query).await
    }

    pub async fn value_error_content(&self, name: &str) -> Result<Vec<TimeValue>, EngineError> {
        self.value_cache.error_file_content(name).await
    }

    pub async fn remove_value_errors(&self, names: &[String]) -> Result<(), EngineError> {
        let result = self.value_cache.remove_error_values(names).await;
        self.publish_usage();
        result
    }

    pub async fn remove_all_value_errors(&self) -> Result<(), EngineError> {
        let result = self.value_cache.remove_all_error_values().await;
        self.publish_usage();
        result
    }

    pub async fn retry_value_errors(&self, names: &[String]) -> Result<(), EngineError> {
        trace!(connector = %self.id, count = names.len(), "Retrying errored value files");
        let result = self.value_cache.retry_error_values(names).await;
        self.publish_usage();
        result
    }

    pub async fn retry_all_value_errors(&self) -> Result<(), EngineError> {
        let result = self.value_cache.retry_all_error_values().await;
        self.publish_usage();
        result
    }

    // ========== Queued files ==========

    pub async fn cache_files(&self, query: &FileQuery) -> Result<Page<CacheFileInfo>, EngineError> {
        self.file_cache.queued_files(query).await
    }

    pub async fn cache_file_content(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        self.file_cache.queued_file_content(name).await
    }

    pub async fn remove_cache_files(&self, names: &[String]) -> Result<(), EngineError> {
        trace!(connector = %self.id, count = names.len(), "Removing queued files");
        let result = self.file_cache.remove_queued_files(names).await;
        self.publish_usage();
        result
    }

    pub async fn remove_all_cache_files(&self) -> Result<(), EngineError> {
        let result = self.file_cache.remove_all_cache_files().await;
        self.publish_usage();
        result
    }

    /// Move queued files to the archive without sending them.
    pub async fn archive_cache_files(&self, names: &[String]) -> Result<(), EngineError> {
        let result = self.file_cache.archive_queued_files(names).await;
        self.publish_usage();
        result
    }

    // ========== Errored files ==========

    pub async fn error_files(&self, query: &FileQuery) -> Result<Page<CacheFileInfo>, EngineError> {
        self.file_cache.error_files(query).await
    }

    pub async fn error_file_content(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        self.file_cache.error_file_content(name).await
    }

    pub async fn remove_error_files(&self, names: &[String]) -> Result<(), EngineError> {
        let result = self.file_cache.remove_error_files(names).await;
        self.publish_usage();
        result
    }

    pub async fn remove_all_error_files(&self) -> Result<(), EngineError> {
        let result = self.file_cache.remove_all_error_files().await;
        self.publish_usage();
        result
    }

    pub async fn retry_error_files(&self, names: &[String]) -> Result<(), EngineError> {
        trace!(connector = %self.id, count = names.len(), "Retrying errored files");
        let result = self.file_cache.retry_error_files(names).await;
        self.publish_usage();
        result
    }

    pub async fn retry_all_error_files(&self) -> Result<(), EngineError> {
        let result = self.file_cache.retry_all_error_files().await;
        self.publish_usage();
        result
    }

    // ========== Archive ==========

    pub async fn archive_files(&self, query: &FileQuery) -> Result<Page<CacheFileInfo>, EngineError> {
        self.archive.archive_files(query).await
    }

    pub async fn archive_file_content(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        self.archive.archive_file_content(name).await
    }

    pub async fn remove_archive_files(&self, names: &[String]) -> Result<(), EngineError> {
        trace!(connector = %self.id, count = names.len(), "Removing archive files");
        let result = self.archive.remove_files(names).await;
        self.publish_usage();
        result
    }

    pub async fn remove_all_archive_files(&self) -> Result<(), EngineError> {
        let result = self.archive.remove_all_archive_files().await;
        self.publish_usage();
        result
    }

    /// Queue archived files again for another delivery.
    pub async fn retry_archive_files(&self, names: &[String]) -> Result<(), EngineError> {
        trace!(connector = %self.id, count = names.len(), "Retrying archive files");
        let result = self.file_cache.retry_archive_files(names).await;
        self.publish_usage();
        result
    }

    pub async fn retry_all_archive_files(&self) -> Result<(), EngineError> {
        let result = self.file_cache.retry_all_archive_files().await;
        self.publish_usage();
        result
    }
}
