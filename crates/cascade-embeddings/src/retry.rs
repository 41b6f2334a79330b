//! Exponential backoff for embedding requests (spec §4.4). The umbrella
//! retry helper the provider crates share is an external dependency not
//! vendored into this workspace, so the discipline is reimplemented here:
//! same shape (`RetryPolicy::exponential(max_retries)`, `with_retry`), same
//! doubling-delay-with-cap behavior.

use std::future::Future;
use std::time::Duration;

/// Backoff schedule for a retryable operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Exponential backoff starting at 200ms, doubling, capped at 10s.
    #[must_use]
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }

    /// No retries: the first failure is final.
    #[must_use]
    pub fn none() -> Self {
        Self::exponential(0)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        scaled.min(self.max_delay)
    }
}

/// Runs `op`, retrying on `Err` up to `policy.max_retries` times with
/// exponential backoff between attempts. The last error is returned if every
/// attempt fails.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_retries {
                    return Err(err);
                }
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_ok() {
        let policy = RetryPolicy::exponential(3);
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_up_to_max_then_returns_last_error() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("boom") }
        })
        .await;
        assert_eq!(result, Err("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_millis(500));
    }
}
