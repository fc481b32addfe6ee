//! Bounded retry with linear backoff

use std::future::Future;
use std::time::Duration;

/// `retries` extra attempts after the first; the pause before attempt `n` is `backoff * n`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self { retries, backoff }
    }

    /// A single attempt
    pub fn once() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Run `op` until it succeeds or attempts run out.
    /// On failure returns the last error with the number of attempts made.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, (E, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts() => {
                    tracing::warn!(
                        operation = label,
                        attempt,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let started = tokio::time::Instant::now();

        let result: Result<u32, (String, u32)> = policy
            .run("flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("failure {n}"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        // 100ms after the first failure, 200ms after the second
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_attempts_when_exhausted() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        let result: Result<(), (&str, u32)> = policy.run("down", || async { Err("nope") }).await;
        assert_eq!(result.unwrap_err(), ("nope", 3));
    }

    #[tokio::test]
    async fn test_once_does_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<(), (&str, u32)> = RetryPolicy::once()
            .run("single", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("no")
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
