//! Cancellable retries with linear backoff.

use std::future::Future;
use std::time::Duration;

use clipstitch_common::{BehaviorConfig, StitchError, StitchResult};
use tokio_util::sync::CancellationToken;

/// Retry budget and backoff step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Sleep after failed attempt `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(1500),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(behavior: &BehaviorConfig) -> Self {
        Self {
            attempts: behavior.retries.max(1),
            backoff: Duration::from_secs_f64(behavior.backoff_secs.max(0.0)),
        }
    }

    /// A policy that never sleeps, for tests and one-shot operations.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: Duration::ZERO,
        }
    }

    /// Delay after the given 1-based failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

/// Run `op` until it succeeds, the budget is spent, or `cancel` fires.
///
/// The token is checked before every attempt and the backoff sleep races
/// it. Errors that are not retryable are returned at once. `op` receives
/// the 1-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> StitchResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = StitchResult<T>>,
{
    let mut last_error = None;

    for attempt in 1..=policy.attempts.max(1) {
        if cancel.is_cancelled() {
            return Err(StitchError::cancelled(what));
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_cancelled() || !e.is_retryable() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    operation = %what,
                    attempt,
                    attempts = policy.attempts,
                    error = %e,
                    "Attempt failed"
                );
                last_error = Some(e);
            }
        }

        if attempt < policy.attempts {
            let delay = policy.delay_for_attempt(attempt);
            tokio::select! {
                _ = cancel.cancelled() => return Err(StitchError::cancelled(what)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    Err(last_error.unwrap_or_else(|| StitchError::unavailable(what, "no attempt was made")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_linear_delay() {
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1500),
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            &RetryPolicy::immediate(3),
            &CancellationToken::new(),
            "download",
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(StitchError::transient("c1", "flaky"))
                    } else {
                        Ok(attempt)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_error() {
        let result: StitchResult<()> = retry_with_backoff(
            &RetryPolicy::immediate(2),
            &CancellationToken::new(),
            "download",
            |attempt| async move { Err(StitchError::fetch(format!("attempt {attempt}"))) },
        )
        .await;
        assert!(result.unwrap_err().to_string().contains("attempt 2"));
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: StitchResult<()> = retry_with_backoff(
            &RetryPolicy::immediate(5),
            &CancellationToken::new(),
            "probe",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StitchError::configuration("bad")) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let result: StitchResult<()> =
            retry_with_backoff(&RetryPolicy::default(), &token, "download", |_| async {
                Ok(())
            })
            .await;
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff_sleep() {
        let token = CancellationToken::new();
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Duration::from_secs(60),
        };
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result: StitchResult<()> = retry_with_backoff(&policy, &token, "download", |_| async {
            Err(StitchError::fetch("offline"))
        })
        .await;
        assert!(result.unwrap_err().is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
