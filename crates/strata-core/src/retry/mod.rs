//! Retrying whole reconciles
//!
//! A [`RetryPolicy`](crate::types::RetryPolicy) decides how often to try and
//! how long to wait in between, a [`RetryPredicate`] decides which errors
//! deserve another attempt and a [`RetryObserver`] sees every failed
//! attempt. The controller manager runs reconciles through [`Retry`] with
//! [`ReconcileRetryPredicate`], so an optimistic-concurrency conflict re-runs
//! the reconcile against a fresh read.
//!
//! ```rust,no_run
//! use strata_core::retry::{retry_with_policy, RetryError};
//! use strata_core::types::RetryPolicy;
//!
//! async fn example() -> Result<&'static str, RetryError<strata_core::Error>> {
//!     retry_with_policy(&RetryPolicy::default(), || async { Ok("reconciled") }).await
//! }
//! ```

mod backoff;
mod error;
mod executor;
mod observer;
mod predicate;

pub use backoff::backoff_delay;
pub use error::RetryError;
pub use executor::{retry_with_policy, Retry};
pub use observer::{RetryObserver, TracingObserver};
pub use predicate::{AnyError, ReconcileRetryPredicate, RetryPredicate};
