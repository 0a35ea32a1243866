// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Disk backpressure for a destination's cache folders.
//!
//! The ceiling covers everything a connector keeps on disk: queued data,
//! quarantined data and archived files. Once it is reached new data is
//! rejected; data already on disk is never evicted to make room.
//!
//! # Example
//!
//! ```
//! use north_engine::BackpressureLevel;
//!
//! // No ceiling configured
//! assert_eq!(BackpressureLevel::from_usage(10_000, 0), BackpressureLevel::Normal);
//!
//! // Close to the ceiling - still accepting, but noisy
//! let level = BackpressureLevel::from_usage(850, 1_000);
//! assert_eq!(level, BackpressureLevel::Warn);
//! assert!(level.should_accept_writes());
//!
//! // At the ceiling - reject new data
//! let level = BackpressureLevel::from_usage(1_000, 1_000);
//! assert_eq!(level, BackpressureLevel::Full);
//! assert!(!level.should_accept_writes());
//! ```

/// Backpressure level based on disk usage against `max_size`.
///
/// - **Normal** (< 80%): accept everything
/// - **Warn** (80-100%): accept, log that the ceiling is near
/// - **Full** (>= 100%): reject new values and files
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackpressureLevel {
    Normal = 0,
    Warn = 1,
    Full = 2,
}

impl BackpressureLevel {
    /// Calculate the level from a pressure ratio (0.0 → 1.0+)
    #[must_use]
    pub fn from_pressure(pressure: f64) -> Self {
        match pressure {
            p if p < 0.80 => Self::Normal,
            p if p < 1.0 => Self::Warn,
            _ => Self::Full,
        }
    }

    /// Calculate the level from bytes used and the configured ceiling (0 = unlimited)
    #[must_use]
    pub fn from_usage(used_bytes: u64, max_bytes: u64) -> Self {
        if max_bytes == 0 {
            return Self::Normal;
        }
        if used_bytes >= max_bytes {
            // Exact comparison, the float ratio could round below 1.0
            return Self::Full;
        }
        Self::from_pressure(used_bytes as f64 / max_bytes as f64)
    }

    #[must_use]
    pub fn should_accept_writes(&self) -> bool {
        !matches!(self, Self::Full)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Normal operation",
            Self::Warn => "Warning - cache close to its maximum size",
            Self::Full => "Full - new values and files are discarded",
        }
    }
}

impl std::fmt::Display for BackpressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Render a byte count as megabytes with two decimals, for log lines.
pub(crate) fn as_megabytes(bytes: u64) -> f64 {
    (bytes as f64 / 1024.0 / 1024.0 * 100.0).floor() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pressure_level_thresholds() {
        assert_eq!(BackpressureLevel::from_pressure(0.0), BackpressureLevel::Normal);
        assert_eq!(BackpressureLevel::from_pressure(0.79), BackpressureLevel::Normal);
        assert_eq!(BackpressureLevel::from_pressure(0.80), BackpressureLevel::Warn);
        assert_eq!(BackpressureLevel::from_pressure(0.99), BackpressureLevel::Warn);
        assert_eq!(BackpressureLevel::from_pressure(1.0), BackpressureLevel::Full);
        assert_eq!(BackpressureLevel::from_pressure(3.5), BackpressureLevel::Full);
    }

    #[test]
    fn test_unlimited_ceiling_never_fills() {
        assert_eq!(BackpressureLevel::from_usage(u64::MAX, 0), BackpressureLevel::Normal);
    }

    #[test]
    fn test_exact_ceiling_is_full() {
        assert_eq!(BackpressureLevel::from_usage(1_000_001, 1_000_001), BackpressureLevel::Full);
        assert_eq!(BackpressureLevel::from_usage(1_000_000, 1_000_001), BackpressureLevel::Warn);
    }

    #[test]
    fn test_should_accept_writes() {
        assert!(BackpressureLevel::Normal.should_accept_writes());
        assert!(BackpressureLevel::Warn.should_accept_writes());
        assert!(!BackpressureLevel::Full.should_accept_writes());
    }

    #[test]
    fn test_level_ordering() {
        assert!(BackpressureLevel::Normal < BackpressureLevel::Warn);
        assert!(BackpressureLevel::Warn < BackpressureLevel::Full);
    }

    #[test]
    fn test_as_megabytes() {
        assert_eq!(as_megabytes(0), 0.0);
        assert_eq!(as_megabytes(1024 * 1024), 1.0);
        assert_eq!(as_megabytes(1024 * 1024 * 3 / 2), 1.5);
    }
}
