//! Bounded retry with exponential backoff and per-attempt timeout.
//!
//! Backend clients wrap each network strategy in [`retry_async`]; the
//! caller's classifier decides which errors are worth another attempt.
//! Fatal errors (authentication, missing configuration) surface
//! immediately.

use std::future::Future;
use std::time::Duration;

use crate::domain::{Result, SkirmishError};

/// Retry policy for one backend strategy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first (1 = no retries).
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub backoff_base: Duration,
    /// Wall-clock limit per attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy with a custom per-attempt timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Whether an error should be retried or surfaced as-is.
pub fn default_classifier(err: &SkirmishError) -> bool {
    match err {
        SkirmishError::Backend { status, .. } => match status {
            // 429 and 5xx are transient backend conditions.
            Some(code) => *code == 429 || *code >= 500,
            // Transport-level failure with no status: retry.
            None => true,
        },
        _ => false,
    }
}

/// Run `op` under `policy`, retrying errors the classifier marks
/// retryable. Timeouts count as retryable backend failures.
pub async fn retry_async<T, F, Fut, C>(policy: &RetryPolicy, classify: C, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&SkirmishError) -> bool,
{
    let mut last_err: Option<SkirmishError> = None;

    for attempt in 1..=policy.max_attempts {
        match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => {
                if !classify(&err) || attempt == policy.max_attempts {
                    return Err(err);
                }
                tracing::debug!(
                    event = "retry.attempt_failed",
                    attempt = attempt,
                    error = %err,
                );
                last_err = Some(err);
            }
            Err(_elapsed) => {
                let err = SkirmishError::backend(format!(
                    "attempt {attempt} timed out after {:?}",
                    policy.timeout
                ));
                if attempt == policy.max_attempts {
                    return Err(err);
                }
                last_err = Some(err);
            }
        }

        let delay = policy.backoff_base * 2u32.saturating_pow(attempt - 1);
        tokio::time::sleep(delay).await;
    }

    Err(last_err.unwrap_or_else(|| SkirmishError::backend("exhausted all attempts")))
}
