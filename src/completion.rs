//! Externally resolvable completion handle.
//!
//! The orchestrator claims a [`Completion`] when a run starts and resolves it
//! when the run ends. `stop()` (or anyone else) can wait on a clone without
//! owning the run itself.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Completion {
    done: Arc<watch::Sender<bool>>,
}

impl Completion {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { done: Arc::new(tx) }
    }

    /// Mark the operation as finished, waking every waiter. Idempotent.
    pub fn resolve(&self) {
        self.done.send_replace(true);
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait until [`resolve`](Self::resolve) has been called.
    pub async fn wait(&self) {
        let mut rx = self.done.subscribe();
        // The sender lives in `self`, so `wait_for` only returns once resolved
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}
