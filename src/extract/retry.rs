//! Retry policy for source fetches.
//!
//! Implements exponential backoff with configurable parameters, applied
//! uniformly by [`with_retry`] around any fetch that yields a [`FetchOutcome`].

use super::FetchOutcome;
use crate::config::ExtractSettings;
use crate::metrics;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per item, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Cap for exponential growth.
    pub max_backoff: Duration,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
    /// Adds up to 10% random delay so concurrent workers do not retry in lockstep.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(config: &ExtractSettings) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            backoff_multiplier: config.backoff_multiplier,
            jitter: true,
        }
    }

    /// Policy that makes a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::immediate(1)
        }
    }

    /// Retries without sleeping. Meant for tests and local fakes.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Backoff before retry number `retry_count` (0-based):
    /// `initial_backoff * multiplier^retry_count`, capped at `max_backoff`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    fn delay_for(&self, retry_count: u32) -> Duration {
        let base = self.backoff(retry_count);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let extra = rand::rng().random_range(0.0..0.1);
        base.mul_f64(1.0 + extra)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Runs `op` until it yields something other than a transient failure or the
/// policy's attempt cap is reached. The last transient failure is returned
/// when attempts run out.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    source: &str,
    mut op: F,
) -> FetchOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FetchOutcome<T>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            FetchOutcome::TransientFailure(error) if policy.should_retry(attempts) => {
                let delay = policy.delay_for(attempts - 1);
                debug!(
                    "{}: attempt {}/{} failed ({}), retrying in {:?}",
                    source, attempts, policy.max_attempts, error, delay
                );
                metrics::record_retry(source);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            FetchOutcome::TransientFailure(error) => {
                warn!("{}: giving up after {} attempts: {}", source, attempts, error);
                return FetchOutcome::TransientFailure(error);
            }
            outcome => return outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::SourceError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    fn unavailable() -> SourceError {
        SourceError::Status {
            status: 503,
            url: "https://example.test".to_string(),
        }
    }

    #[test]
    fn test_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = policy(5);

        // retry_count=0: 1 * 2^0 = 1
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        // retry_count=1: 1 * 2^1 = 2
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        // retry_count=3: 1 * 2^3 = 8
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        // retry_count=5: 1 * 2^5 = 32, capped at 30
        assert_eq!(policy.backoff(5), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_huge_retry_count_is_capped() {
        assert_eq!(policy(3).backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_should_retry_counts_first_attempt() {
        let policy = policy(3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    #[tokio::test]
    async fn test_transient_then_found() {
        let calls = AtomicU32::new(0);
        let outcome = with_retry(&RetryPolicy::immediate(3), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                FetchOutcome::TransientFailure(unavailable())
            } else {
                FetchOutcome::Found(7)
            }
        })
        .await;
        assert_eq!(outcome, FetchOutcome::Found(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let outcome: FetchOutcome<()> = with_retry(&RetryPolicy::immediate(3), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            FetchOutcome::TransientFailure(unavailable())
        })
        .await;
        assert!(matches!(outcome, FetchOutcome::TransientFailure(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_and_not_found_are_not_retried() {
        let calls = AtomicU32::new(0);
        let outcome: FetchOutcome<()> = with_retry(&RetryPolicy::immediate(3), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            FetchOutcome::PermanentFailure(SourceError::Malformed("bad".into()))
        })
        .await;
        assert!(matches!(outcome, FetchOutcome::PermanentFailure(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let outcome: FetchOutcome<()> =
            with_retry(&RetryPolicy::immediate(3), "test", || async {
                FetchOutcome::NotFound
            })
            .await;
        assert_eq!(outcome, FetchOutcome::NotFound);
    }
}
