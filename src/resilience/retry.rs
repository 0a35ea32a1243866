// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry and quarantine policy for pinned delivery units.
//!
//! A unit that fails stays pinned and is attempted again on later runs, never
//! sooner than `retry_interval` after the previous failure. It is quarantined
//! once its failure count exceeds `retry_count` **and** the last error is not
//! marked retryable. A fatal error therefore still gets `retry_count` extra
//! attempts, and a retryable one keeps the unit queued indefinitely.
//!
//! # Example
//!
//! ```
//! use north_engine::{DeliveryError, RetryPolicy, RetryState, RetryDecision};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy { retry_count: 2, retry_interval: Duration::ZERO };
//! let mut state = RetryState::default();
//! let fatal = DeliveryError::fatal("bad payload");
//!
//! assert_eq!(state.record_failure(&policy, &fatal), RetryDecision::Retry);
//! assert_eq!(state.record_failure(&policy, &fatal), RetryDecision::Retry);
//! assert_eq!(state.record_failure(&policy, &fatal), RetryDecision::Quarantine);
//! ```

use std::time::Duration;
use tokio::time::Instant;

use crate::config::ErrorSettings;
use crate::error::DeliveryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_count: u32,
    /// Minimum time between a failure and the next attempt on the same unit
    pub retry_interval: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_settings(settings: &ErrorSettings) -> Self {
        Self {
            retry_count: settings.retry_count,
            retry_interval: settings.retry_interval(),
        }
    }

    /// Should a unit that has now failed `error_count` times leave the queue?
    #[must_use]
    pub fn should_quarantine(&self, error_count: u32, error: &DeliveryError) -> bool {
        error_count > self.retry_count && !error.retry
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&ErrorSettings::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Keep the unit pinned for another attempt
    Retry,
    /// Move the unit to the error folder
    Quarantine,
}

/// Failure bookkeeping of the currently pinned unit.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    error_count: u32,
    last_failure: Option<Instant>,
}

impl RetryState {
    #[must_use]
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Forget everything, for a new unit or after a success.
    pub fn reset(&mut self) {
        self.error_count = 0;
        self.last_failure = None;
    }

    pub fn record_failure(&mut self, policy: &RetryPolicy, error: &DeliveryError) -> RetryDecision {
        self.error_count += 1;
        self.last_failure = Some(Instant::now());
        if policy.should_quarantine(self.error_count, error) {
            RetryDecision::Quarantine
        } else {
            RetryDecision::Retry
        }
    }

    /// Time left before the pinned unit may be attempted again.
    #[must_use]
    pub fn remaining_backoff(&self, policy: &RetryPolicy) -> Option<Duration> {
        let last = self.last_failure?;
        let elapsed = last.elapsed();
        (elapsed < policy.retry_interval).then(|| policy.retry_interval - elapsed)
    }
}
