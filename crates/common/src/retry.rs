//! Retry logic with exponential backoff.
//!
//! The Redis-backed layers wrap transport calls in [`retry_with_predicate`]
//! so transient disconnects and Sentinel failovers are absorbed up to a
//! bounded budget before an error surfaces.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt (0 disables retries)
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound on any single delay
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each retry
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with the default delays.
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Constant delay between attempts.
    pub fn linear(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Fail on the first error.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Set the upper bound on any single delay.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }
}

/// Tracks the delay schedule across attempts.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// The delay to sleep before the current attempt. Zero for the first.
    pub fn delay(&self) -> Duration {
        if self.attempt == 0 {
            return Duration::ZERO;
        }
        let millis = self.config.initial_delay.as_millis() as f64
            * self.config.multiplier.powi(self.attempt as i32 - 1);
        Duration::from_millis(millis as u64).min(self.config.max_delay)
    }

    /// Record a failed attempt.
    pub fn advance(&mut self) {
        self.attempt += 1;
    }

    /// Whether the retry budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.attempt > self.config.max_attempts
    }
}

/// Retry an async operation with exponential backoff until it succeeds or
/// the budget is exhausted, in which case the last error is returned.
pub async fn retry_with_backoff<F, Fut, T, E>(config: RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_predicate(config, operation, |_| true).await
}

/// Retry an async operation, consulting `should_retry` before each retry so
/// non-transient errors surface immediately.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    config: RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut backoff = ExponentialBackoff::new(config);

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !should_retry(&error) {
                    return Err(error);
                }

                backoff.advance();
                if backoff.is_exhausted() {
                    return Err(error);
                }

                let delay = backoff.delay();
                tracing::debug!(delay_ms = delay.as_millis() as u64, "Retrying after error");
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_schedule_doubles() {
        let mut backoff = ExponentialBackoff::new(RetryConfig::exponential(4));
        assert_eq!(backoff.delay(), Duration::ZERO);

        backoff.advance();
        assert_eq!(backoff.delay(), Duration::from_millis(100));
        backoff.advance();
        assert_eq!(backoff.delay(), Duration::from_millis(200));
        backoff.advance();
        assert_eq!(backoff.delay(), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_respects_max_delay() {
        let config = RetryConfig::exponential(16).with_max_delay(Duration::from_millis(250));
        let mut backoff = ExponentialBackoff::new(config);
        for _ in 0..16 {
            backoff.advance();
        }
        assert!(backoff.delay() <= Duration::from_millis(250));
    }

    #[test]
    fn test_linear_schedule() {
        let mut backoff =
            ExponentialBackoff::new(RetryConfig::linear(3, Duration::from_millis(50)));
        backoff.advance();
        assert_eq!(backoff.delay(), Duration::from_millis(50));
        backoff.advance();
        assert_eq!(backoff.delay(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_success_is_returned_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<u32, std::io::Error> =
            retry_with_backoff(RetryConfig::exponential(3), || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_eventual_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(
            RetryConfig::linear(3, Duration::from_millis(1)),
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(std::io::Error::new(std::io::ErrorKind::Other, "flaky"))
                    } else {
                        Ok(())
                    }
                }
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry_with_backoff(
            RetryConfig::linear(2, Duration::from_millis(1)),
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(std::io::Error::new(std::io::ErrorKind::Other, "down"))
                }
            },
        )
        .await;

        assert!(result.is_err());
        // Initial attempt plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_predicate_stops_non_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry_with_predicate(
            RetryConfig::exponential(5),
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "denied",
                    ))
                }
            },
            |err| err.kind() == std::io::ErrorKind::TimedOut,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
