//! Coalescing FIFO of pending run requests.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::model::ScanMode;

pub const VALUE_TRIGGER_ID: &str = "value-trigger";
pub const FILE_TRIGGER_ID: &str = "file-trigger";

/// What a run should attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunFlag {
    /// Values, then files
    Scan,
    ValueTrigger,
    FileTrigger,
}

impl RunFlag {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::ValueTrigger => VALUE_TRIGGER_ID,
            Self::FileTrigger => FILE_TRIGGER_ID,
        }
    }

    #[must_use]
    pub fn sends_values(&self) -> bool {
        matches!(self, Self::Scan | Self::ValueTrigger)
    }

    #[must_use]
    pub fn sends_files(&self) -> bool {
        matches!(self, Self::Scan | Self::FileTrigger)
    }
}

/// One pending run request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEntry {
    ScanMode(ScanMode),
    ValueTrigger,
    FileTrigger,
}

impl TaskEntry {
    /// Coalescing key: the scan mode id, or the pseudo scan mode id
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::ScanMode(scan_mode) => &scan_mode.id,
            Self::ValueTrigger => VALUE_TRIGGER_ID,
            Self::FileTrigger => FILE_TRIGGER_ID,
        }
    }

    #[must_use]
    pub fn flag(&self) -> RunFlag {
        match self {
            Self::ScanMode(_) => RunFlag::Scan,
            Self::ValueTrigger => RunFlag::ValueTrigger,
            Self::FileTrigger => RunFlag::FileTrigger,
        }
    }
}

/// Strict FIFO with at most one entry per id.
///
/// Adding to an empty queue raises a "next" signal. The consumer pops the head
/// only once the run it started for that head has finished, so the head stays
/// visible (and blocks duplicates) while it runs.
#[derive(Debug)]
pub struct TaskQueue {
    connector_id: String,
    entries: Mutex<VecDeque<TaskEntry>>,
    next: mpsc::UnboundedSender<()>,
}

impl TaskQueue {
    pub fn new(connector_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<()>) {
        let (next, next_rx) = mpsc::unbounded_channel();
        let queue = Self {
            connector_id: connector_id.into(),
            entries: Mutex::new(VecDeque::new()),
            next,
        };
        (queue, next_rx)
    }

    /// Append unless an entry with the same id is pending. Returns whether it
    /// was added.
    pub fn add(&self, entry: TaskEntry) -> bool {
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.id() == entry.id()) {
            warn!(
                connector = %self.connector_id,
                task = %entry.id(),
                "Task already in queue, trigger dropped"
            );
            crate::metrics::record_trigger_coalesced(&self.connector_id, entry.id());
            return false;
        }
        trace!(connector = %self.connector_id, task = %entry.id(), queued = entries.len() + 1, "Task added to queue");
        entries.push_back(entry);
        if entries.len() == 1 {
            self.signal_next();
        }
        true
    }

    #[must_use]
    pub fn head(&self) -> Option<TaskEntry> {
        self.entries.lock().front().cloned()
    }

    pub fn pop_front(&self) -> Option<TaskEntry> {
        self.entries.lock().pop_front()
    }

    /// Remove the head only if it is still `id`.
    pub fn pop_if(&self, id: &str) -> Option<TaskEntry> {
        let mut entries = self.entries.lock();
        if entries.front().is_some_and(|e| e.id() == id) {
            entries.pop_front()
        } else {
            None
        }
    }

    /// Ask the consumer to look at the head again.
    pub fn signal_next(&self) {
        let _ = self.next.send(());
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Pending ids in queue order
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.id().to_string()).collect()
    }
}
