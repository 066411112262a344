//! Retry logic for external calls
//!
//! Exponential backoff around calls to the enrichment service, image lookup
//! and record store.

use crate::error::PipelineResult;
use std::time::Duration;

/// Retry settings for one collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub attempts: u32,
    /// Delay before the first retry; doubles each retry
    pub initial_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(2000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, initial_delay_ms: u64) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_delay: Duration::from_millis(initial_delay_ms),
            ..Default::default()
        }
    }

    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

/// Run `operation` until it succeeds, fails fatally, or attempts run out
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. On success, return result
/// 3. On a fatal error, return it immediately
/// 4. Otherwise, if attempts remain: log WARN, sleep, double the delay, retry
/// 5. When attempts are exhausted, return the last error
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> PipelineResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = PipelineResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) if attempt >= attempts => {
                tracing::error!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Operation failed: retries exhausted"
                );
                return Err(err);
            }
            Err(err) => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, will retry after backoff"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                delay = (delay * 2).min(policy.max_delay.max(policy.initial_delay));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = retry_with_backoff("test_op", fast(3), || async { Ok::<i32, PipelineError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("test_op", fast(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(PipelineError::external("test", "unavailable"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let result: PipelineResult<()> = retry_with_backoff("test_op", fast(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::Store("locked".into())) }
        })
        .await;

        assert!(matches!(result, Err(PipelineError::Store(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: PipelineResult<()> = retry_with_backoff("test_op", fast(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::Checkpoint("disk".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_never_zero_attempts() {
        assert_eq!(RetryPolicy::new(0, 10).attempts, 1);
        assert_eq!(RetryPolicy::none().attempts, 1);
    }
}
