//! # Bounded Retry
//!
//! Exponential backoff with jitter for storage operations. The dedup
//! pipeline is best-effort: a transient storage failure gets a couple of
//! extra attempts, then the event is dropped rather than retried forever.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::types::Result;

/// Configuration for a bounded retry loop
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: usize,
    /// Base duration for exponential backoff
    pub base_backoff: Duration,
    /// Maximum backoff time
    pub max_backoff: Duration,
    /// Jitter factor (0.0 - 1.0) to add randomness to backoff
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::database()
    }
}

impl RetryPolicy {
    /// Policy tuned for storage operations
    pub fn database() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            jitter_factor: 0.1,
        }
    }

    /// Policy that never retries
    pub fn never() -> Self {
        Self {
            max_attempts: 1,
            ..Self::database()
        }
    }

    /// Calculates the backoff duration before retry number `attempt`
    /// (0-based), capped and jittered to avoid thundering herds.
    fn backoff(&self, attempt: usize) -> Duration {
        let base_ms = self.base_backoff.as_millis() as f64;
        let max_ms = self.max_backoff.as_millis() as f64;

        let exp_backoff = base_ms * 2.0_f64.powf(attempt as f64);
        let capped = exp_backoff.min(max_ms);

        let jitter_range = capped * self.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    /// Runs an async operation, retrying on failure until the attempt
    /// budget is spent. The final error is returned to the caller.
    pub async fn run<F, Fut, T>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt + 1 < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after failure"
                    );
                    metrics::counter!("error_monitor.retry.attempts", 1);
                    sleep(delay).await;
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
    use crate::types::MonitorError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let policy = RetryPolicy::database();
        let result: Result<u32> = policy.run("noop", || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let policy = RetryPolicy {
            base_backoff: Duration::from_millis(1),
            ..RetryPolicy::database()
        };
        let calls = AtomicUsize::new(0);

        let result = policy
            .run("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(MonitorError::Storage("transient".to_string()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_backoff: Duration::from_millis(1),
            ..RetryPolicy::database()
        };
        let calls = AtomicUsize::new(0);

        let result: Result<()> = policy
            .run("doomed", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(MonitorError::Storage("still down".to_string())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
