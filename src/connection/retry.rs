//! Bounded exponential backoff
//!
//! Attempt `i` (0-indexed) waits `base * 2^(i-1)` before running; the first
//! attempt runs immediately. The same formula drives connection attempts and
//! scheduled job retries.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::types::{DatastoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_retries: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Result of a retried operation together with how many attempts it took
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
        }
    }

    /// Sleep preceding attempt `attempt`, `None` for the first attempt
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.base_delay.saturating_mul(factor))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted. Inter-attempt sleeps are async and never block
    /// other tasks.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if let Some(delay) = self.delay_before(attempt) {
                warn!(
                    target_label = %label,
                    attempt = attempt + 1,
                    max = self.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }

            match op(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt + 1,
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!(target_label = %label, attempt = attempt + 1, error = %e, "Attempt failed");
                    last_error = Some(e);
                }
                Err(e) => {
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt + 1,
                    }
                }
            }
        }

        RetryOutcome {
            result: Err(last_error.unwrap_or_else(|| {
                DatastoreError::Internal(format!("{}: no attempts were made", label))
            })),
            attempts: self.max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        let delays: Vec<_> = (0..5).map(|i| policy.delay_before(i)).collect();
        assert_eq!(
            delays,
            vec![
                None,
                Some(Duration::from_millis(100)),
                Some(Duration::from_millis(200)),
                Some(Duration::from_millis(400)),
                Some(Duration::from_millis(800)),
            ]
        );
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::new(100, Duration::from_secs(1));
        assert!(policy.delay_before(80).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(4, Duration::from_millis(50));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let outcome = policy
            .run("flaky", move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(DatastoreError::Database("transient".into()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(outcome.result.unwrap(), "done");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_fatal_error() {
        let policy = RetryPolicy::new(4, Duration::from_millis(50));
        let outcome: RetryOutcome<()> = policy
            .run("fatal", |_| async {
                Err(DatastoreError::missing_variable("SRIE_MAIN_USER_DB_URL"))
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert!(outcome.result.unwrap_err().is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exhausts_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let outcome: RetryOutcome<()> = policy
            .run("down", |_| async { Err(DatastoreError::Database("down".into())) })
            .await;

        assert_eq!(outcome.attempts, 3);
        tokio_test::assert_err!(outcome.result);
    }
}
