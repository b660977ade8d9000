use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

pub const MAX_RETRIES: u32 = 5;
pub const INITIAL_DELAY_MS: u64 = 2000;

/// Errors that know whether another attempt may succeed.
pub trait Retriable {
    fn is_retriable(&self) -> bool;
}

/// Bounded exponential backoff: attempt `n` (1-based) that fails with a
/// retriable error waits `initial_delay * 2^(n-1)` before attempt `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_delay: Duration::from_millis(INITIAL_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay.saturating_mul(2_u32.pow(exponent))
    }

    /// Runs `op` until it succeeds, fails with a non-retriable error, or the
    /// retry budget is spent. The last error is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retriable + Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() && attempt <= self.max_retries => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = label,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retriable failure, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(operation = label, attempt, error = %e, "Giving up");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum TestError {
        RateLimited(u32),
        Safety,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Retriable for TestError {
        fn is_retriable(&self) -> bool {
            matches!(self, TestError::RateLimited(_))
        }
    }

    #[test]
    fn delays_double_from_initial() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(32000));
        assert_eq!(policy.max_attempts(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_three_rate_limits() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result = policy
            .run("test", || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= 3 {
                        Err(TestError::RateLimited(n))
                    } else {
                        Ok("image")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("image"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 2s + 4s + 8s of backoff, nothing more.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(14_000));
        assert!(elapsed < Duration::from_millis(15_000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_at_sixth_attempt_with_last_error() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = policy
            .run("test", || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(TestError::RateLimited(n))
                }
            })
            .await;

        assert_eq!(result, Err(TestError::RateLimited(6)));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_is_not_retried() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result: Result<(), _> = policy
            .run("test", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Safety)
                }
            })
            .await;

        assert_eq!(result, Err(TestError::Safety));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_millis(1));
    }
}
