//! Public types for the connector orchestrator.

use std::path::PathBuf;

use crate::model::Content;
use crate::resilience::retry::RetryState;

/// Connector lifecycle state.
///
/// Use [`super::NorthOrchestrator::state()`] to read it or
/// [`super::NorthOrchestrator::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// Not started, or fully stopped
    Stopped,
    /// Loading settings, rebuilding caches, connecting
    Starting,
    /// Started, no run in progress
    Idle,
    /// A run is delivering content
    Running,
    /// Waiting for the in-flight run, then tearing down
    Stopping,
}

impl std::fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Starting => write!(f, "Starting"),
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Outcome of handing data to a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Persisted in the cache
    Accepted,
    /// Discarded because the cache reached `max_size`
    Rejected,
}

impl Admission {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Values taken from the queue and not yet acknowledged.
#[derive(Debug)]
pub(super) struct PendingValues {
    /// Cache files the values came from
    pub keys: Vec<String>,
    pub content: Content,
}

impl PendingValues {
    pub fn count(&self) -> usize {
        match &self.content {
            Content::TimeValues(values) => values.len(),
            Content::Raw { .. } => 0,
        }
    }
}

/// The unit a run keeps attempting until it is sent or quarantined.
#[derive(Debug)]
pub(super) struct Pinned<T> {
    pub unit: Option<T>,
    pub retry: RetryState,
}

impl<T> Default for Pinned<T> {
    fn default() -> Self {
        Self {
            unit: None,
            retry: RetryState::default(),
        }
    }
}

impl<T> Pinned<T> {
    pub fn clear(&mut self) {
        self.unit = None;
        self.retry.reset();
    }
}

pub(super) type PinnedValues = Pinned<PendingValues>;
pub(super) type PinnedFile = Pinned<PathBuf>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;
    use crate::model::TimeValue;
    use crate::resilience::retry::RetryPolicy;
    use serde_json::json;

    #[test]
    fn test_connector_state_display() {
        assert_eq!(format!("{}", ConnectorState::Stopped), "Stopped");
        assert_eq!(format!("{}", ConnectorState::Running), "Running");
        assert_eq!(format!("{}", ConnectorState::Stopping), "Stopping");
    }

    #[test]
    fn test_pending_values_count() {
        let pending = PendingValues {
            keys: vec!["a.queue.tmp".into()],
            content: Content::TimeValues(vec![
                TimeValue::new("p1", "2024-01-01T00:00:00.000Z", json!(1)),
                TimeValue::new("p2", "2024-01-01T00:00:00.000Z", json!(2)),
            ]),
        };
        assert_eq!(pending.count(), 2);
    }

    #[test]
    fn test_clear_resets_retry_state() {
        let mut pinned = PinnedFile::default();
        pinned.unit = Some(PathBuf::from("files/a.csv"));
        pinned.retry.record_failure(&RetryPolicy::default(), &DeliveryError::fatal("x"));

        pinned.clear();
        assert!(pinned.unit.is_none());
        assert_eq!(pinned.retry.error_count(), 0);
    }
}
