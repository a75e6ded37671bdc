//! Bounded exponential-backoff retry for single service operations.
//!
//! Wraps one fallible asynchronous operation. The k-th retry waits
//! `initial_delay * 2^(k-1)`; after `max_attempts` retries the last error
//! propagates unchanged. The loop is iterative so stack usage does not grow
//! with the retry count.

use crate::config::duration_ms;
use crate::errors::ServiceError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 2000;

/// Retry policy for a single fallible asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retries after the initial attempt.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    #[serde(with = "duration_ms")]
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with explicit bounds.
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
        }
    }

    /// Delay before the k-th retry (k = 1..=max_attempts).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }

    /// Run `op`, retrying retryable errors up to `max_attempts` times.
    ///
    /// Non-retryable errors (malformed responses) propagate immediately.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && retry < self.max_attempts => {
                    retry += 1;
                    let delay = self.delay_for(retry);
                    warn!(
                        op = label,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying service operation"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_backoff_schedule_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(8000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);

        let result = policy
            .run("draft", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ServiceError::Transient("reset".into()))
                } else {
                    Ok("chapter text")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "chapter text");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_propagates_last_error_after_full_backoff() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), _> = policy
            .run("draft", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Transient(format!("attempt {n}")))
            })
            .await;

        // Initial attempt plus three retries, waiting 2s + 4s + 8s between them.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(14_000));
        match result {
            Err(ServiceError::Transient(msg)) => assert_eq!(msg, "attempt 3"),
            other => panic!("Expected last transient error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_response_is_not_retried() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run("finalize", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Malformed("no JSON object".into()))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ServiceError::Malformed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_means_single_invocation() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run("draft", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Timeout(Duration::from_secs(1)))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.is_err());
    }
}
