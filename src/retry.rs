// Retry policy for upstream calls.
// Exponential backoff with jitter, bounded attempts, and per-kind limits.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{LensError, Result};

/// Backoff settings shared by the GitHub and analysis clients.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Random spread applied to each delay, as a fraction in [0, 1].
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), before jitter.
    fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << (retry.saturating_sub(1)).min(16);
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = rand::thread_rng().gen_range(-jitter..=jitter);
        delay.mul_f64((1.0 + spread).max(0.0))
    }

    /// How long to wait before retrying after `err`, or `None` to surface it.
    ///
    /// Rate limits may use every attempt; unavailability is retried once.
    /// A server hint longer than `max_delay_ms` is surfaced rather than slept on.
    fn next_delay(
        &self,
        err: &LensError,
        attempt: u32,
        unavailable_retries: u32,
    ) -> Option<Duration> {
        if attempt >= self.max_attempts || !err.is_retryable() {
            return None;
        }
        match err {
            LensError::RateLimited { retry_after } => match retry_after {
                Some(hint) if *hint > Duration::from_millis(self.max_delay_ms) => None,
                Some(hint) => Some(*hint),
                None => Some(self.with_jitter(self.backoff(attempt))),
            },
            LensError::UpstreamUnavailable(_) if unavailable_retries == 0 => {
                Some(self.with_jitter(self.backoff(attempt)))
            }
            _ => None,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        let mut unavailable_retries = 0;

        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let Some(delay) = self.next_delay(&err, attempt, unavailable_retries) else {
                if attempt > 1 {
                    warn!(label, attempt, error = %err, "giving up after retries");
                }
                return Err(err);
            };

            if matches!(err, LensError::UpstreamUnavailable(_)) {
                unavailable_retries += 1;
            }
            debug!(label, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter: 0.0,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(6), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let d = policy.with_jitter(Duration::from_millis(1_000));
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1_500));
        }
    }

    #[tokio::test]
    async fn test_rate_limit_retries_until_success() {
        let calls = &AtomicU32::new(0);
        let result = fast()
            .run("test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LensError::RateLimited { retry_after: None })
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_attempts_are_bounded() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = fast()
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LensError::RateLimited { retry_after: None })
            })
            .await;
        assert!(matches!(result, Err(LensError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_unavailable_retried_once() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = fast()
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LensError::UpstreamUnavailable("503".into()))
            })
            .await;
        assert!(matches!(result, Err(LensError::UpstreamUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_not_found_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = fast()
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LensError::NotFound("issue".into()))
            })
            .await;
        assert!(matches!(result, Err(LensError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_only_retryable_kinds_get_a_delay() {
        let policy = fast();
        for err in [
            LensError::InvalidResponse("HTTP 422".into()),
            LensError::Unauthorized,
            LensError::InvalidInput("bad".into()),
            LensError::CacheUnavailable("disk".into()),
        ] {
            assert!(!err.is_retryable());
            assert_eq!(policy.next_delay(&err, 1, 0), None, "{err:?}");
        }
        let unavailable = LensError::UpstreamUnavailable("503".into());
        assert_eq!(policy.next_delay(&unavailable, 1, 0), Some(Duration::from_millis(1)));
        assert_eq!(policy.next_delay(&unavailable, 2, 1), None);
    }

    #[tokio::test]
    async fn test_long_retry_hint_is_surfaced() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = fast()
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LensError::RateLimited {
                    retry_after: Some(Duration::from_secs(3600)),
                })
            })
            .await;
        assert!(matches!(result, Err(LensError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
