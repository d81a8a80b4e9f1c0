//! Outcome of a failed retry loop

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// Why a retry loop ended without a result
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt the policy allows failed
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        source: E,
    },

    /// The predicate declined to retry
    Rejected { attempt: u32, source: E },

    /// The policy allows no attempt at all
    NoAttempts,
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Rejected { attempt, .. } => *attempt,
            Self::NoAttempts => 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Error of the last attempt
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Exhausted { source, .. } | Self::Rejected { source, .. } => Some(source),
            Self::NoAttempts => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted {
                attempts,
                elapsed,
                source,
            } => write!(
                f,
                "gave up after {} attempts in {:.2}s: {}",
                attempts,
                elapsed.as_secs_f64(),
                source
            ),
            Self::Rejected { attempt, source } => {
                write!(f, "not retried after attempt {}: {}", attempt, source)
            }
            Self::NoAttempts => f.write_str("retry policy allows no attempts"),
        }
    }
}

impl<E: StdError + 'static> StdError for RetryError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Exhausted { source, .. } | Self::Rejected { source, .. } => Some(source),
            Self::NoAttempts => None,
        }
    }
}

/// Reconcile callers only care about the last error
impl From<RetryError<crate::Error>> for crate::Error {
    fn from(err: RetryError<crate::Error>) -> Self {
        match err.into_source() {
            Some(source) => source,
            None => crate::Error::invalid_config("retry policy allows no attempts"),
        }
    }
}
