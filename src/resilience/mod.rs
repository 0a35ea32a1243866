//! Failure handling for deliveries.

pub mod retry;

pub use retry::{RetryDecision, RetryPolicy, RetryState};
