//! Exponential backoff for transient infrastructure errors

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;
use types::errors::Transient;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_millis(20),
            backoff_max: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

/// Why [`RetryPolicy::run`] stopped
#[derive(Debug)]
pub enum RetryError<E> {
    /// The error is not worth retrying
    Permanent(E),
    /// Every attempt failed transiently; carries the last error
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base = self.backoff_base.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.backoff_max.as_nanos() as f64);
        Duration::from_nanos(capped as u64)
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt budget
    /// is spent. `on_retry` observes each transient failure.
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        mut op: F,
        mut on_retry: impl FnMut(u32, &E),
    ) -> Result<T, RetryError<E>>
    where
        E: Transient + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(RetryError::Permanent(e)),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(RetryError::Exhausted { attempts: attempt, last: e });
                    }
                    let delay = self.backoff(attempt - 1);
                    warn!(
                        what,
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    on_retry(attempt, &e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use thiserror::Error;

    #[derive(Debug, Error)]
    enum FakeError {
        #[error("flaky")]
        Flaky,
        #[error("broken")]
        Broken,
    }

    impl Transient for FakeError {
        fn is_transient(&self) -> bool {
            matches!(self, FakeError::Flaky)
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            backoff_base: Duration::from_millis(10),
            backoff_max: Duration::from_millis(50),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(10));
        assert_eq!(policy.backoff(1), Duration::from_millis(20));
        assert_eq!(policy.backoff(2), Duration::from_millis(40));
        assert_eq!(policy.backoff(3), Duration::from_millis(50));
        assert_eq!(policy.backoff(60), Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let mut retries = 0;
        let result = RetryPolicy::default()
            .run(
                "op",
                || async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(FakeError::Flaky)
                    } else {
                        Ok(7)
                    }
                },
                |_, _| retries += 1,
            )
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run(
                "op",
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(FakeError::Broken)
                },
                |_, _| {},
            )
            .await;
        assert!(matches!(result, Err(RetryError::Permanent(FakeError::Broken))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_is_exhausted() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let result: Result<(), _> = policy
            .run("op", || async { Err(FakeError::Flaky) }, |_, _| {})
            .await;
        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 3, .. })
        ));
    }
}
