//! Reusable exponential-backoff policy for provider calls.
//!
//! Stages that talk to an external provider receive a [`BackoffPolicy`]
//! instead of hand-rolling sleep-and-retry loops. Only transient errors
//! (rate limit, quota, transport) are retried; permanent errors return
//! immediately.

use crate::provider::ModelError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff configuration: max attempts, base delay, multiplier, jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total attempt cap, including the first try
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied per retry
    pub multiplier: f64,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Add up to 25% random jitter to each delay
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (0-based). Strictly increasing
    /// until the cap is reached.
    pub fn delay_for(&self, retry: u32, err: &ModelError) -> Duration {
        let base = self.base_delay.as_secs_f64() * self.multiplier.powi(retry as i32);
        let mut capped = base.min(self.max_delay.as_secs_f64());

        // Respect the server's retry-after when it is longer than ours
        if let Some(server_secs) = err.retry_after() {
            capped = capped.max(server_secs as f64);
        }

        if self.jitter {
            capped += capped * 0.25 * pseudo_random();
        }
        Duration::from_secs_f64(capped)
    }

    /// Run `operation` with retries on transient errors.
    ///
    /// Returns the first success, or the last error once attempts are
    /// exhausted or a permanent error is hit.
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T, ModelError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        let mut last_err = None;
        for attempt in 0..self.max_attempts {
            match operation().await {
                Ok(val) => return Ok(val),
                Err(e) => {
                    if !e.is_retryable() || attempt + 1 == self.max_attempts {
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt, &e);
                    warn!(
                        attempt = attempt + 1,
                        max = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient provider error"
                    );
                    tokio::time::sleep(delay).await;
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(ModelError::Connection {
            message: "All retry attempts exhausted".to_string(),
        }))
    }
}

/// Cheap jitter source; avoids pulling in the rand crate.
fn pseudo_random() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn quota_err() -> ModelError {
        ModelError::QuotaExhausted {
            message: "per-minute cap".to_string(),
        }
    }

    #[test]
    fn test_delays_strictly_increase() {
        let policy = BackoffPolicy::default();
        let e = quota_err();
        let d0 = policy.delay_for(0, &e);
        let d1 = policy.delay_for(1, &e);
        let d2 = policy.delay_for(2, &e);
        assert!(d0 < d1 && d1 < d2);
    }

    #[test]
    fn test_delay_respects_server_retry_after() {
        let policy = BackoffPolicy::default();
        let err = ModelError::RateLimited {
            retry_after_secs: 30,
        };
        assert!(policy.delay_for(0, &err) >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let policy = BackoffPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();
        let started = Instant::now();

        let result = policy
            .run(|| {
                let calls = calls_ref.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(quota_err())
                    } else {
                        Ok("third attempt content".to_string())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "third attempt content");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two backoff waits: 2s then 4s
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let policy = BackoffPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result: Result<(), _> = policy
            .run(|| {
                let calls = calls_ref.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ModelError::Parse {
                        message: "bad json".to_string(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_returns_last_error() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result: Result<(), _> = policy
            .run(|| {
                let calls = calls_ref.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(quota_err())
                }
            })
            .await;

        assert!(matches!(result, Err(ModelError::QuotaExhausted { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
