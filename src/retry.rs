//! Bounded retries with exponential backoff for model calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{adapter::duration_secs, error::CallError};

/// How often and how patiently a fallible model call is retried.
///
/// Only errors flagged retryable are retried. The delay before retry `n`
/// (zero-based) is `base_delay * 2^n`, capped at `max_delay`, unless the
/// provider supplied its own `retry_after`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one (default: 3)
    pub max_attempts: usize,
    /// Delay before the first retry (default: 1s)
    #[serde(with = "duration_secs")]
    pub base_delay: Duration,
    /// Upper bound for any single delay (default: 30s)
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// A successful value along with the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: usize,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Default::default()
        }
    }

    /// A policy that never waits, for tests and local mocks.
    pub fn immediate(max_attempts: usize) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    pub fn delay_for(&self, retry: usize) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31) as u32);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// `op` receives the zero-based attempt index. The last error is returned
    /// unchanged when every attempt fails.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<Attempted<T>, CallError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0usize;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    return Ok(Attempted {
                        value,
                        attempts: attempt + 1,
                    })
                }
                Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                    let delay = err.retry_after.unwrap_or_else(|| self.delay_for(attempt));
                    warn!(
                        "{} attempt {}/{} failed: {}. Retrying in {:?}...",
                        label,
                        attempt + 1,
                        max_attempts,
                        err,
                        delay
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(5));
        assert_eq!(policy.delay_for(200), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicUsize::new(0);
        let result = RetryPolicy::immediate(3)
            .run("test", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(CallError::retryable("overloaded"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result.value, "done");
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let err = RetryPolicy::immediate(3)
            .run::<(), _, _>("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::retryable("still overloaded")) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.message, "still overloaded");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let err = RetryPolicy::immediate(3)
            .run::<(), _, _>("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::fatal("bad request")) }
            })
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_follow_doubling_backoff() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
        };
        let start = Instant::now();
        let seen = Mutex::new(Vec::new());
        let err = policy
            .run::<(), _, _>("test", |_| {
                seen.lock().unwrap().push(start.elapsed());
                async { Err(CallError::retryable("overloaded")) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.message, "overloaded");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Duration::ZERO,
                Duration::from_millis(200),
                Duration::from_millis(600),
                Duration::from_millis(1400),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn server_retry_after_overrides_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let start = Instant::now();
        let seen = Mutex::new(Vec::new());
        let result = policy
            .run("test", |attempt| {
                seen.lock().unwrap().push(start.elapsed());
                async move {
                    if attempt == 0 {
                        Err(CallError::retryable("rate limited")
                            .with_retry_after(Duration::from_secs(7)))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result.attempts, 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Duration::ZERO, Duration::from_secs(7)]
        );
    }
}
