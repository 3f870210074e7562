//! Bounded retry for remote store operations
//!
//! Store clients never retry on their own. Callers decide which failures are
//! worth another attempt (transient errors for listings, conflicts and
//! transient errors for the audit log) and how many attempts they can afford.

use crate::store::StoreError;
use std::future::Future;
use std::time::Duration;

/// Retry budget and backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `n * backoff` plus up to half a backoff of jitter
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self { max_retries, backoff }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff.saturating_mul(attempt);
        let jitter_cap = (self.backoff / 2).as_millis() as u64;
        if jitter_cap == 0 {
            return base;
        }
        base + Duration::from_millis(rand::random::<u64>() % jitter_cap)
    }
}

/// Final failure of a retried operation
#[derive(Debug)]
pub struct RetryExhausted {
    pub error: StoreError,
    /// Attempts made, including the first
    pub attempts: u32,
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy's budget is spent
///
/// Returns the value and the number of attempts used.
pub async fn retry_store_op<F, Fut, T, R>(
    operation_name: &str,
    policy: RetryPolicy,
    should_retry: R,
    mut operation: F,
) -> Result<(T, u32), RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
    R: Fn(&StoreError) -> bool,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying store operation");
        }

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Store operation succeeded after retry"
                    );
                }
                return Ok((value, attempt));
            }
            Err(error) if should_retry(&error) && attempt <= policy.max_retries => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %error,
                    "Store operation failed, will retry after backoff"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                if should_retry(&error) {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        error = %error,
                        "Store operation failed: retry budget exhausted"
                    );
                }
                return Err(RetryExhausted {
                    error,
                    attempts: attempt,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = retry_store_op("test_op", RetryPolicy::new(3, Duration::ZERO), |_| true, || async {
            Ok::<i32, StoreError>(42)
        })
        .await
        .unwrap();

        assert_eq!(result, (42, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_errors() {
        let mut calls = 0;

        let result = retry_store_op(
            "test_op",
            RetryPolicy::new(3, Duration::from_millis(100)),
            StoreError::is_transient,
            || {
                calls += 1;
                let current = calls;
                async move {
                    if current < 3 {
                        Err(StoreError::Transient("timeout".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(result, (7, 3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_budget() {
        let mut calls = 0;

        let err = retry_store_op(
            "test_op",
            RetryPolicy::new(2, Duration::from_millis(10)),
            StoreError::is_transient,
            || {
                calls += 1;
                async { Err::<(), _>(StoreError::Transient("down".to_string())) }
            },
        )
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(calls, 3);
        assert!(err.error.is_transient());
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let mut calls = 0;

        let err = retry_store_op("test_op", RetryPolicy::new(5, Duration::ZERO), StoreError::is_transient, || {
            calls += 1;
            async { Err::<(), _>(StoreError::NotFound("tracks/sad".to_string())) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls, 1);
        assert_eq!(err.attempts, 1);
        assert!(matches!(err.error, StoreError::NotFound(_)));
    }

    #[test]
    fn test_delay_grows_linearly_with_bounded_jitter() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        for attempt in 1..=3 {
            let delay = policy.delay(attempt);
            let base = Duration::from_millis(100 * attempt as u64);
            assert!(delay >= base);
            assert!(delay < base + Duration::from_millis(50));
        }
        assert_eq!(RetryPolicy::none().delay(1), Duration::ZERO);
    }
}
