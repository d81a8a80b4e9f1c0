//! Delay between attempts

use crate::types::{RetryPolicy, RetryStrategy};
use rand::Rng;
use std::time::Duration;

/// Delay after the `failed_attempts`-th failure (1-based).
///
/// The strategy delay is capped at `max_delay_ms`; jitter then adds up to a
/// quarter of the capped delay. A zero delay stays zero.
///
/// ```rust
/// use strata_core::retry::backoff_delay;
/// use strata_core::types::{RetryPolicy, RetryStrategy};
///
/// let policy = RetryPolicy {
///     max_attempts: 4,
///     strategy: RetryStrategy::ExponentialBackoff,
///     backoff_multiplier: 3.0,
///     initial_delay_ms: 10,
///     max_delay_ms: 60,
/// };
///
/// assert_eq!(backoff_delay(&policy, 1, false).as_millis(), 10);
/// assert_eq!(backoff_delay(&policy, 2, false).as_millis(), 30);
/// assert_eq!(backoff_delay(&policy, 3, false).as_millis(), 60);
/// ```
pub fn backoff_delay(policy: &RetryPolicy, failed_attempts: u32, jitter: bool) -> Duration {
    let step = failed_attempts.saturating_sub(1);
    let millis = match policy.strategy {
        RetryStrategy::None => 0,
        RetryStrategy::FixedDelay => policy.initial_delay_ms,
        RetryStrategy::LinearBackoff => policy
            .initial_delay_ms
            .saturating_mul(u64::from(step) + 1),
        RetryStrategy::ExponentialBackoff => {
            let factor = policy.backoff_multiplier.max(1.0).powi(step.min(64) as i32);
            (policy.initial_delay_ms as f64 * factor).min(u64::MAX as f64) as u64
        }
    }
    .min(policy.max_delay_ms);

    if !jitter || millis == 0 {
        return Duration::from_millis(millis);
    }
    Duration::from_millis(millis + rand::rng().random_range(0..=millis / 4))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(strategy: RetryStrategy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            strategy,
            backoff_multiplier: 2.0,
            initial_delay_ms: 200,
            max_delay_ms: 1000,
        }
    }

    #[test]
    fn test_linear_grows_by_initial_delay() {
        let policy = policy(RetryStrategy::LinearBackoff);
        let delays: Vec<u128> = (1..=6)
            .map(|n| backoff_delay(&policy, n, false).as_millis())
            .collect();
        assert_eq!(delays, vec![200, 400, 600, 800, 1000, 1000]);
    }

    #[test]
    fn test_none_ignores_jitter() {
        let policy = policy(RetryStrategy::None);
        for n in 1..=5 {
            assert_eq!(backoff_delay(&policy, n, true), Duration::ZERO);
        }
    }

    #[test]
    fn test_exponential_saturates_at_cap() {
        let policy = policy(RetryStrategy::ExponentialBackoff);
        assert_eq!(backoff_delay(&policy, 3, false), Duration::from_millis(800));
        assert_eq!(backoff_delay(&policy, 200, false), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let policy = policy(RetryStrategy::FixedDelay);
        for _ in 0..64 {
            let delay = backoff_delay(&policy, 1, true).as_millis();
            assert!((200..=250).contains(&delay), "{}", delay);
        }
    }
}
