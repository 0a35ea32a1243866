//! Folder utilities shared by the caches.
//!
//! Everything here treats the filesystem as the source of truth: listings are
//! recomputed from `read_dir`, and per-file failures (a file vanishing between
//! `read_dir` and `metadata`) are logged and skipped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, error};

use crate::error::EngineError;

pub const VALUE_FOLDER: &str = "values";
pub const VALUE_ERROR_FOLDER: &str = "values-errors";
pub const FILE_FOLDER: &str = "files";
pub const FILE_ERROR_FOLDER: &str = "files-errors";
pub const ARCHIVE_FOLDER: &str = "archive";

const DEFAULT_PAGE_SIZE: usize = 50;

/// Ensure every folder exists before a cache starts.
pub async fn create_base_folders<P: AsRef<Path>>(paths: &[P]) -> Result<(), EngineError> {
    for path in paths {
        let path = path.as_ref();
        fs::create_dir_all(path)
            .await
            .map_err(|e| EngineError::io(path, e))?;
    }
    Ok(())
}

/// Total size in bytes of the regular files below `path` (recursive).
///
/// A missing folder counts as empty.
pub async fn dir_size(path: &Path) -> u64 {
    let mut total = 0;
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    error!(path = %dir.display(), error = %e, "Could not read folder while computing its size");
                }
                continue;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            match entry.metadata().await {
                Ok(meta) if meta.is_dir() => pending.push(entry.path()),
                Ok(meta) => total += meta.len(),
                Err(e) => debug!(path = %entry.path().display(), error = %e, "Skipping file in size computation"),
            }
        }
    }
    total
}

static SEQUENCE: AtomicU64 = AtomicU64::new(0);
static LAST_MICROS: AtomicU64 = AtomicU64::new(0);

/// Strictly increasing microsecond timestamp for this process.
///
/// Two calls in the same microsecond (or after a small clock step back) still
/// produce increasing values, so names built on it sort in creation order.
pub fn monotonic_micros() -> u64 {
    let now = Utc::now().timestamp_micros().max(0) as u64;
    let mut last = LAST_MICROS.load(Ordering::Acquire);
    loop {
        let next = now.max(last + 1);
        match LAST_MICROS.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Collision-free file name whose lexical order follows creation order.
///
/// Shape: `<20-digit micros>-<6-digit sequence>-<8 hex>.<suffix>`
pub fn unique_name(suffix: &str) -> String {
    let micros = monotonic_micros();
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed) % 1_000_000;
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{:020}-{:06}-{}.{}", micros, sequence, &random[..8], suffix)
}

/// Reject names that would escape the folder they are resolved against.
pub fn checked_file_name(name: &str) -> Result<&str, EngineError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(EngineError::InvalidFileName(name.to_string()));
    }
    Ok(name)
}

/// Metadata of one file exposed to the inspection interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheFileInfo {
    pub filename: String,
    pub modification_date: DateTime<Utc>,
    pub size: u64,
}

/// Filter + page selection for folder listings.
#[derive(Debug, Clone, Default)]
pub struct FileQuery {
    /// Inclusive lower bound on modification time
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on modification time
    pub to: Option<DateTime<Utc>>,
    /// Case-insensitive substring of the file name
    pub name_contains: Option<String>,
    /// Zero-based page index
    pub page: usize,
    /// Defaults to 50 when 0
    pub page_size: usize,
}

impl FileQuery {
    #[must_use]
    pub fn all() -> Self {
        Self {
            page_size: usize::MAX,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn matches(&self, info: &CacheFileInfo) -> bool {
        if self.from.is_some_and(|from| info.modification_date < from) {
            return false;
        }
        if self.to.is_some_and(|to| info.modification_date > to) {
            return false;
        }
        match &self.name_contains {
            Some(needle) if !needle.is_empty() => info
                .filename
                .to_uppercase()
                .contains(&needle.to_uppercase()),
            _ => true,
        }
    }

    fn effective_page_size(&self) -> usize {
        if self.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub total_elements: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    #[must_use]
    pub fn paginate(items: Vec<T>, page: usize, page_size: usize) -> Self {
        let total_elements = items.len();
        let page_size = page_size.max(1);
        let total_pages = total_elements.div_ceil(page_size);
        let content = items
            .into_iter()
            .skip(page.saturating_mul(page_size))
            .take(page_size)
            .collect();
        Self {
            content,
            total_elements,
            page,
            page_size,
            total_pages,
        }
    }
}

/// Best creation timestamp available for a file: birth time where the platform
/// reports it, modification time otherwise.
pub fn creation_time(meta: &std::fs::Metadata) -> SystemTime {
    meta.created()
        .or_else(|_| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Regular files directly under `folder` with their metadata.
pub async fn read_files(folder: &Path) -> Result<Vec<(PathBuf, std::fs::Metadata)>, EngineError> {
    let mut entries = fs::read_dir(folder)
        .await
        .map_err(|e| EngineError::io(folder, e))?;
    let mut files = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => return Err(EngineError::io(folder, e)),
        };
        let path = entry.path();
        match entry.metadata().await {
            Ok(meta) if meta.is_file() => files.push((path, meta)),
            Ok(_) => {}
            Err(e) => {
                error!(path = %path.display(), error = %e, "Error while reading file stats");
            }
        }
    }
    Ok(files)
}

/// Filtered, name-sorted, paginated listing of a folder.
pub async fn list_files(folder: &Path, query: &FileQuery) -> Result<Page<CacheFileInfo>, EngineError> {
    let mut infos: Vec<CacheFileInfo> = read_files(folder)
        .await?
        .into_iter()
        .filter_map(|(path, meta)| {
            let filename = path.file_name()?.to_string_lossy().into_owned();
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some(CacheFileInfo {
                filename,
                modification_date: DateTime::<Utc>::from(modified),
                size: meta.len(),
            })
        })
        .filter(|info| query.matches(info))
        .collect();
    infos.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(Page::paginate(infos, query.page, query.effective_page_size()))
}

/// Names of every regular file directly under `folder`, sorted.
pub async fn file_names(folder: &Path) -> Result<Vec<String>, EngineError> {
    let mut names: Vec<String> = read_files(folder)
        .await?
        .into_iter()
        .filter_map(|(path, _)| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    Ok(names)
}

/// Remove a file, treating "already gone" as success. Returns the bytes freed.
pub async fn remove_file(path: &Path) -> Result<u64, EngineError> {
    let size = fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
    match fs::remove_file(path).await {
        Ok(()) => Ok(size),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "File already removed");
            Ok(0)
        }
        Err(e) => Err(EngineError::io(path, e)),
    }
}

/// Move a file, returning its size in bytes.
pub async fn move_file(from: &Path, to: &Path) -> Result<u64, EngineError> {
    let size = fs::metadata(from)
        .await
        .map_err(|e| EngineError::io(from, e))?
        .len();
    fs::rename(from, to)
        .await
        .map_err(|e| EngineError::io(from, e))?;
    Ok(size)
}

/// Is the folder empty (or unreadable, which is logged)?
pub async fn is_folder_empty(folder: &Path) -> bool {
    match fs::read_dir(folder).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(e) => {
            error!(path = %folder.display(), error = %e, "Could not read cache folder");
            true
        }
    }
}

/// Remove every file in `folder` whose `mtime + retention <= now`.
///
/// Per-file failures are logged and the sweep moves on. Returns the number of
/// files removed and the bytes freed.
pub async fn remove_expired_files(folder: &Path, retention: Duration, now: SystemTime) -> (usize, u64) {
    let files = match read_files(folder).await {
        Ok(files) => files,
        Err(e) => {
            error!(path = %folder.display(), error = %e, "Error while reading folder for retention sweep");
            return (0, 0);
        }
    };
    let mut removed = 0;
    let mut freed = 0;
    for (path, meta) in files {
        let modified = match meta.modified() {
            Ok(modified) => modified,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Error while reading file modification time");
                continue;
            }
        };
        if modified + retention > now {
            continue;
        }
        match remove_file(&path).await {
            Ok(bytes) => {
                debug!(path = %path.display(), "Expired file removed");
                removed += 1;
                freed += bytes;
            }
            Err(e) => error!(error = %e, "Error while removing expired file"),
        }
    }
    (removed, freed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_unique_names_sort_in_creation_order() {
        let names: Vec<String> = (0..500).map(|_| unique_name("queue.tmp")).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names[0].ends_with(".queue.tmp"));
    }

    #[test]
    fn test_checked_file_name() {
        assert!(checked_file_name("data-1.csv").is_ok());
        assert!(checked_file_name("../etc/passwd").is_err());
        assert!(checked_file_name("a/b").is_err());
        assert!(checked_file_name("..").is_err());
        assert!(checked_file_name("").is_err());
    }

    #[test]
    fn test_paginate() {
        let page = Page::paginate((0..7).collect::<Vec<_>>(), 1, 3);
        assert_eq!(page.content, vec![3, 4, 5]);
        assert_eq!(page.total_elements, 7);
        assert_eq!(page.total_pages, 3);

        let last = Page::paginate((0..7).collect::<Vec<_>>(), 2, 3);
        assert_eq!(last.content, vec![6]);

        let beyond = Page::paginate((0..7).collect::<Vec<_>>(), 5, 3);
        assert!(beyond.content.is_empty());
    }

    #[test]
    fn test_query_matches_name_case_insensitively() {
        let info = CacheFileInfo {
            filename: "Boiler-Data.csv".into(),
            modification_date: Utc::now(),
            size: 10,
        };
        let query = FileQuery {
            name_contains: Some("boiler".into()),
            ..Default::default()
        };
        assert!(query.matches(&info));

        let query = FileQuery {
            name_contains: Some("turbine".into()),
            ..Default::default()
        };
        assert!(!query.matches(&info));
    }

    #[test]
    fn test_query_matches_date_range() {
        let now = Utc::now();
        let info = CacheFileInfo {
            filename: "x".into(),
            modification_date: now,
            size: 0,
        };
        let inside = FileQuery {
            from: Some(now - chrono::Duration::minutes(1)),
            to: Some(now + chrono::Duration::minutes(1)),
            ..Default::default()
        };
        assert!(inside.matches(&info));

        let before = FileQuery {
            to: Some(now - chrono::Duration::minutes(1)),
            ..Default::default()
        };
        assert!(!before.matches(&info));
    }

    #[tokio::test]
    async fn test_dir_size_and_listing() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("values");
        create_base_folders(&[&sub]).await.unwrap();
        tokio::fs::write(sub.join("b.json"), b"12345").await.unwrap();
        tokio::fs::write(sub.join("a.json"), b"123").await.unwrap();

        assert_eq!(dir_size(dir.path()).await, 8);
        assert_eq!(dir_size(&dir.path().join("missing")).await, 0);

        let page = list_files(&sub, &FileQuery::default()).await.unwrap();
        let names: Vec<_> = page.content.iter().map(|i| i.filename.as_str()).collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
        assert!(!is_folder_empty(&sub).await);
    }

    #[tokio::test]
    async fn test_remove_file_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.tmp");
        tokio::fs::write(&path, b"abc").await.unwrap();

        assert_eq!(remove_file(&path).await.unwrap(), 3);
        assert_eq!(remove_file(&path).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_expired_files_respects_retention() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("old.csv"), b"abc").await.unwrap();

        let retention = Duration::from_secs(3600);
        let (removed, _) = remove_expired_files(dir.path(), retention, SystemTime::now()).await;
        assert_eq!(removed, 0);

        let later = SystemTime::now() + Duration::from_secs(3601);
        let (removed, freed) = remove_expired_files(dir.path(), retention, later).await;
        assert_eq!(removed, 1);
        assert_eq!(freed, 3);
        assert!(is_folder_empty(dir.path()).await);
    }
}
