//! The attempt loop

use super::backoff::backoff_delay;
use super::error::RetryError;
use super::observer::RetryObserver;
use super::predicate::{AnyError, RetryPredicate};
use crate::types::RetryPolicy;
use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

/// Retry `op` on every error as `policy` allows
pub async fn retry_with_policy<F, Fut, T, E>(policy: &RetryPolicy, op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    Retry::new(policy.clone()).run(op).await
}

/// A retry loop with its policy, predicate and observer.
///
/// ```rust
/// use strata_core::retry::{ReconcileRetryPredicate, Retry, TracingObserver};
/// use strata_core::types::RetryPolicy;
///
/// let retry = Retry::new(RetryPolicy::default())
///     .retry_if(ReconcileRetryPredicate)
///     .observed_by(TracingObserver::new("reconcile Installation default/root"));
/// assert_eq!(retry.policy().max_attempts, 3);
/// ```
pub struct Retry<P = AnyError, O = ()> {
    policy: RetryPolicy,
    predicate: P,
    observer: O,
    jitter: bool,
}

impl Retry {
    /// Retry every error, with jitter
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            predicate: AnyError,
            observer: (),
            jitter: true,
        }
    }
}

impl<P, O> Retry<P, O> {
    pub fn retry_if<P2>(self, predicate: P2) -> Retry<P2, O> {
        Retry {
            policy: self.policy,
            predicate,
            observer: self.observer,
            jitter: self.jitter,
        }
    }

    pub fn observed_by<O2>(self, observer: O2) -> Retry<P, O2> {
        Retry {
            policy: self.policy,
            predicate: self.predicate,
            observer,
            jitter: self.jitter,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, the predicate rejects its error or the
    /// policy's attempts are used up
    pub async fn run<F, Fut, T, E>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: RetryPredicate<E>,
        O: RetryObserver,
    {
        if self.policy.max_attempts == 0 {
            return Err(RetryError::NoAttempts);
        }

        let started = Instant::now();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => {
                    self.observer.on_success(attempt, started.elapsed());
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !self.predicate.should_retry(&error) {
                self.observer.on_give_up(attempt, &error, false);
                return Err(RetryError::Rejected {
                    attempt,
                    source: error,
                });
            }
            if attempt >= self.policy.max_attempts {
                self.observer.on_give_up(attempt, &error, true);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    elapsed: started.elapsed(),
                    source: error,
                });
            }

            let delay = backoff_delay(&self.policy, attempt, self.jitter);
            self.observer.on_retry(attempt, &error, delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
