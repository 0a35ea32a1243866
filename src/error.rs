// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the delivery engine.
//!
//! Two families live here:
//! - [`EngineError`]: cache, folder and configuration failures raised by the engine itself.
//! - [`DeliveryError`]: failures reported by a destination's `handle_content`, carrying the
//!   retry classification that drives the quarantine state machine.
//!
//! # Example
//!
//! ```
//! use north_engine::DeliveryError;
//!
//! let err = DeliveryError::from_status(503, "service unavailable");
//! assert!(err.retry);
//!
//! let err = DeliveryError::from_status(400, "bad payload");
//! assert!(!err.retry);
//! ```

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed cache file '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },
    #[error("Scan mode '{0}' not found")]
    ScanModeNotFound(String),
    #[error("North connector '{0}' not found")]
    ConnectorNotFound(String),
    #[error("Invalid file name '{0}'")]
    InvalidFileName(String),
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    /// True when the underlying I/O error is "file not found".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Failure reported by a destination while delivering content.
///
/// `retry = true` marks the failure as transient: the unit stays pinned and is
/// never quarantined for it. `retry = false` still gets `retry_count` attempts
/// before the unit is moved to the error folder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DeliveryError {
    pub message: String,
    pub retry: bool,
}

impl DeliveryError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry: false,
        }
    }

    /// Classify an HTTP status code.
    ///
    /// 401, 408, 429 and every 5xx are transient; other statuses are fatal.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let retry = matches!(status, 401 | 408 | 429 | 500..=599);
        Self {
            message: format!("HTTP {}: {}", status, message.into()),
            retry,
        }
    }

    /// Classify a transport-level I/O error.
    pub fn from_io(err: &io::Error) -> Self {
        let retry = matches!(
            err.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::TimedOut
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::Interrupted
                | io::ErrorKind::WouldBlock
        );
        Self {
            message: err.to_string(),
            retry,
        }
    }
}
