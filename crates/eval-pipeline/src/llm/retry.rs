use crate::utils::error::EvalError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry-with-backoff applied to every outbound LLM call. Only
/// transient failures are re-attempted; quota and validation errors
/// propagate immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    /// base · 2^attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, EvalError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EvalError>>,
{
    let mut last_error = None;
    for attempt in 0..policy.attempts {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                warn!(
                    "{} attempt {}/{} failed: {}",
                    operation,
                    attempt + 1,
                    policy.attempts,
                    err
                );
                if attempt + 1 < policy.attempts {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_error
        .unwrap_or_else(|| EvalError::Transient(format!("{operation} produced no attempts"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, 1)
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(&fast_policy(), "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(EvalError::Transient("503".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(&fast_policy(), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EvalError::Transient("503".into())) }
        })
        .await;
        assert!(matches!(result, Err(EvalError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_quota_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(&fast_policy(), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(EvalError::Quota {
                    message: "exceeded".into(),
                    retry_after: Some(60),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(EvalError::Quota { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(3, 100);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }
}
