//! Which failures get another attempt

/// Decides whether a failed attempt is worth repeating
pub trait RetryPredicate<E>: Send + Sync {
    fn should_retry(&self, error: &E) -> bool;
}

/// Retries every error
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyError;

impl<E> RetryPredicate<E> for AnyError {
    fn should_retry(&self, _error: &E) -> bool {
        true
    }
}

impl<E, F> RetryPredicate<E> for F
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &E) -> bool {
        self(error)
    }
}

/// Retries conflicts and transient reconcile failures.
///
/// Fatal configuration errors, wait conditions and cancellation end the
/// attempt loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileRetryPredicate;

impl RetryPredicate<crate::Error> for ReconcileRetryPredicate {
    fn should_retry(&self, error: &crate::Error) -> bool {
        if error.is_conflict() {
            return true;
        }
        !(error.is_fatal() || error.is_wait() || matches!(error, crate::Error::Cancelled))
    }
}
