//! Retry observation

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

/// Sees the outcome of every attempt
pub trait RetryObserver: Send + Sync {
    /// `attempt` failed; the next one starts after `delay`
    fn on_retry(&self, attempt: u32, error: &dyn Display, delay: Duration);

    /// `attempts` were made and none will follow. `retryable` is false when
    /// the predicate rejected the error.
    fn on_give_up(&self, attempts: u32, error: &dyn Display, retryable: bool);

    fn on_success(&self, _attempts: u32, _elapsed: Duration) {}
}

impl RetryObserver for () {
    fn on_retry(&self, _attempt: u32, _error: &dyn Display, _delay: Duration) {}

    fn on_give_up(&self, _attempts: u32, _error: &dyn Display, _retryable: bool) {}
}

impl<T: RetryObserver + ?Sized> RetryObserver for Arc<T> {
    fn on_retry(&self, attempt: u32, error: &dyn Display, delay: Duration) {
        (**self).on_retry(attempt, error, delay)
    }

    fn on_give_up(&self, attempts: u32, error: &dyn Display, retryable: bool) {
        (**self).on_give_up(attempts, error, retryable)
    }

    fn on_success(&self, attempts: u32, elapsed: Duration) {
        (**self).on_success(attempts, elapsed)
    }
}

/// Logs retries of one operation with `tracing`
#[derive(Debug, Clone)]
pub struct TracingObserver {
    operation: String,
}

impl TracingObserver {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }
}

impl RetryObserver for TracingObserver {
    fn on_retry(&self, attempt: u32, error: &dyn Display, delay: Duration) {
        tracing::debug!(
            operation = %self.operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Retrying after {}",
            error
        );
    }

    fn on_give_up(&self, attempts: u32, error: &dyn Display, retryable: bool) {
        if retryable {
            tracing::warn!(operation = %self.operation, attempts, "Giving up: {}", error);
        } else {
            tracing::debug!(operation = %self.operation, attempts, "Not retrying: {}", error);
        }
    }

    fn on_success(&self, attempts: u32, elapsed: Duration) {
        if attempts > 1 {
            tracing::debug!(
                operation = %self.operation,
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "Succeeded after retrying"
            );
        }
    }
}
