//! Bounded retry with linear backoff

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_RETRIES: u32 = 5;
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Retry policy for listener delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt)
    pub retries: u32,
    /// Delay added per attempt
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            backoff_step: DEFAULT_BACKOFF_STEP,
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff_step: Duration) -> Self {
        Self {
            retries,
            backoff_step,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Delay before attempt n (0-indexed). Attempt 0 is not delayed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Run `op` until it succeeds or the policy's attempts are exhausted.
///
/// `op` receives the attempt index. The last error is returned on failure.
pub async fn with_retries<T, E, F, Fut>(policy: RetryPolicy, target: &str, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        let delay = policy.delay_for_attempt(attempt);
        if !delay.is_zero() {
            tracing::debug!(
                target_name = target,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying delivery"
            );
            tokio::time::sleep(delay).await;
        }

        match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(target_name = target, attempt = attempt, "delivery recovered after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt + 1 >= policy.attempts() => return Err(e),
            Err(e) => {
                tracing::debug!(
                    target_name = target,
                    attempt = attempt,
                    attempts = policy.attempts(),
                    error = %e,
                    "delivery attempt failed"
                );
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_delay_is_linear() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));

        assert_eq!(policy.attempts(), 6);
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retries_exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let started = tokio::time::Instant::now();

        let counter = calls.clone();
        let result: Result<(), String> = with_retries(policy, "test", |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("boom".to_string())
            }
        })
        .await;

        assert_eq!(result, Err("boom".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 100 + 200 + 300
        assert!(started.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retries_stops_on_success() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));

        let result: Result<u32, String> = with_retries(policy, "test", |attempt| async move {
            if attempt < 2 { Err(format!("attempt {attempt}")) } else { Ok(attempt) }
        })
        .await;

        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn test_zero_retries_is_single_attempt() {
        let policy = RetryPolicy::new(0, Duration::from_millis(100));
        let calls = AtomicU32::new(0);

        let result: Result<(), &str> = with_retries(policy, "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("nope") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
