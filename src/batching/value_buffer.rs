// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Flush decisions for the value cache's buffer stage.
//!
//! Incoming value chunks are written to disk straight away as buffer files.
//! [`ValueBuffer`] tracks those files and decides when they must be merged
//! into a queue file: immediately once a count threshold is hit, otherwise
//! when the flush timer fires.
//!
//! # Example
//!
//! ```
//! use north_engine::{ValueBuffer, BufferConfig, FlushReason};
//!
//! let mut buffer = ValueBuffer::new(BufferConfig { buffer_max: 250, group_count: 100 });
//! assert!(buffer.is_empty());
//!
//! // 50 buffered, nothing queued: wait for the timer
//! assert_eq!(buffer.push("a.buffer.tmp".into(), 50, 0), None);
//!
//! // 100 buffered reaches the group count: flush now
//! assert_eq!(buffer.push("b.buffer.tmp".into(), 50, 0), Some(FlushReason::MaxFlush));
//! assert_eq!(buffer.take().len(), 2);
//! ```

use tracing::debug;

/// Why the buffer was flushed into the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Flush timer fired
    Time,
    /// Count threshold reached
    MaxFlush,
    /// Buffer files found on disk at start
    Recovery,
    /// Manual flush requested
    Manual,
}

impl FlushReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Time => "time-flush",
            Self::MaxFlush => "max-flush",
            Self::Recovery => "recovery",
            Self::Manual => "manual",
        }
    }
}

/// Thresholds for the buffer stage
#[derive(Debug, Clone, Copy)]
pub struct BufferConfig {
    /// Flush as soon as more than this many values are buffered
    pub buffer_max: usize,
    /// Flush as soon as buffered + queued values reach this count
    pub group_count: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            buffer_max: 250,
            group_count: 1_000,
        }
    }
}

/// One buffer file awaiting flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferEntry {
    pub name: String,
    pub count: usize,
}

/// Index of buffer files with their element counts, in write order.
#[derive(Debug, Default)]
pub struct ValueBuffer {
    config: BufferConfig,
    entries: Vec<BufferEntry>,
    total: usize,
}

impl ValueBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            total: 0,
        }
    }

    pub fn set_config(&mut self, config: BufferConfig) {
        self.config = config;
    }

    /// Record a buffer file. Returns a reason if it must be flushed now.
    pub fn push(&mut self, name: String, count: usize, queued: usize) -> Option<FlushReason> {
        self.entries.push(BufferEntry { name, count });
        self.total += count;
        self.check(queued)
    }

    /// Record a buffer file recovered from disk, without a flush decision.
    pub fn restore(&mut self, name: String, count: usize) {
        self.entries.push(BufferEntry { name, count });
        self.total += count;
    }

    /// Count thresholds only; the time threshold is owned by the caller's timer
    #[must_use]
    pub fn check(&self, queued: usize) -> Option<FlushReason> {
        if self.entries.is_empty() {
            return None;
        }
        if self.total > self.config.buffer_max || self.total + queued >= self.config.group_count {
            Some(FlushReason::MaxFlush)
        } else {
            None
        }
    }

    /// Drain the index for flushing
    pub fn take(&mut self) -> Vec<BufferEntry> {
        let count = self.entries.len();
        let elements = self.total;
        self.total = 0;
        debug!(files = count, elements, "Buffer taken for flush");
        std::mem::take(&mut self.entries)
    }

    /// Put entries back after a failed flush, ahead of anything buffered since
    pub fn restore_front(&mut self, mut entries: Vec<BufferEntry>) {
        self.total += entries.iter().map(|e| e.count).sum::<usize>();
        entries.append(&mut self.entries);
        self.entries = entries;
    }

    pub fn entries(&self) -> &[BufferEntry] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of buffered values
    #[must_use]
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total = 0;
    }
}
