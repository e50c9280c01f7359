//! Bounded exponential backoff for transient backend failures.

use std::time::Duration;

use crate::error::OrchestratorError;

/// How many times, and how long, to retry a transient failure before giving up.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// The default policy for fast operations: three attempts, doubling from 1s.
    #[must_use]
    pub fn fast_op() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fast_op()
    }
}

/// Run `op`, retrying on [`OrchestratorError::Transient`] with doubling
/// backoff (1s, 2s, 4s, ...) up to `policy.max_attempts` attempts. Any other
/// error, or exhaustion of attempts, is returned as-is.
///
/// # Errors
///
/// Returns the last error encountered once attempts are exhausted, or
/// immediately on a non-retryable error.
pub async fn with_retry<F, Fut, T>(policy: RetryPolicy, mut op: F) -> Result<T, OrchestratorError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, OrchestratorError>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                tracing::warn!(attempt, backoff_secs = backoff.as_secs(), error = %err, "retrying transient backend failure");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
        };

        let result = with_retry(policy, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(OrchestratorError::Transient { reason: "timeout".to_owned() })
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .expect("eventually succeeds");

        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), OrchestratorError> = with_retry(RetryPolicy::fast_op(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(OrchestratorError::Rejected { reason: "bad spec".to_owned() }) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
