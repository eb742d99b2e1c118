use crate::error::InfraError;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::warn;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Maximum total time to spend retrying
    pub max_total_time: Duration,
    /// Jitter factor to add randomness to delays (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_total_time: Duration::from_secs(300),
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Provisioning API calls, which throttle aggressively
    pub fn for_engine_calls() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_total_time: Duration::from_secs(600),
            jitter_factor: 0.2,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_millis((delay.as_millis() as f64 * self.backoff_multiplier) as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = if self.jitter_factor > 0.0 {
            let jitter_amount = delay.as_millis() as f64 * self.jitter_factor;
            let random_jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_amount;
            Duration::from_millis(random_jitter.abs() as u64)
        } else {
            Duration::ZERO
        };
        std::cmp::min(delay + jitter, self.max_delay)
    }
}

/// Retry executor with exponential backoff and jitter
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt or time budget is spent
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, InfraError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, InfraError>>,
    {
        let start_time = Instant::now();
        let mut attempt = 0;
        let mut delay = self.config.initial_delay;

        loop {
            attempt += 1;

            if start_time.elapsed() > self.config.max_total_time {
                return Err(InfraError::timeout(format!(
                    "Operation timed out after {} attempts over {:?}",
                    attempt - 1,
                    start_time.elapsed()
                )));
            }

            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !error.is_retryable() || attempt >= self.config.max_attempts {
                        return Err(error);
                    }

                    let wait = self.config.jittered(delay);
                    warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        retry_in = ?wait,
                        error = %error,
                        "Operation failed, retrying"
                    );
                    sleep(wait).await;
                    delay = self.config.next_delay(delay);
                }
            }
        }
    }

    /// Execute with retries, bounded by an overall timeout
    pub async fn execute_with_timeout<F, Fut, T>(
        &self,
        operation: F,
        timeout: Duration,
    ) -> Result<T, InfraError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, InfraError>>,
    {
        match tokio::time::timeout(timeout, self.execute(operation)).await {
            Ok(result) => result,
            Err(_) => Err(InfraError::timeout(format!(
                "Operation timed out after {:?}",
                timeout
            ))),
        }
    }
}

/// Retry an engine call with the engine retry profile
pub async fn retry_engine_call<F, Fut, T>(operation: F) -> Result<T, InfraError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, InfraError>>,
{
    RetryExecutor::new(RetryConfig::for_engine_calls())
        .execute(operation)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            jitter_factor: 0.0,
            ..RetryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_retry_success_on_first_attempt() {
        let executor = RetryExecutor::new(RetryConfig::default());
        let result = executor.execute(|| async { Ok::<i32, InfraError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_throttling_is_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = RetryExecutor::new(fast())
            .execute(move || {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(InfraError::from(EngineError::Throttled("Rate exceeded".to_string())))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_errors_fail_fast() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = RetryExecutor::new(fast())
            .execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, InfraError>(InfraError::config("bad region")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_max_attempts_exceeded() {
        let result = RetryExecutor::new(RetryConfig {
            max_attempts: 2,
            ..fast()
        })
        .execute(|| async {
            Err::<i32, InfraError>(EngineError::Network("connection reset".to_string()).into())
        })
        .await;

        assert!(result.unwrap_err().to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_execute_with_timeout() {
        let result = RetryExecutor::new(fast())
            .execute_with_timeout(
                || async {
                    sleep(Duration::from_millis(200)).await;
                    Ok::<i32, InfraError>(1)
                },
                Duration::from_millis(20),
            )
            .await;

        assert_eq!(result.unwrap_err().category(), "timeout");
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig {
            max_delay: Duration::from_millis(150),
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        assert_eq!(
            config.jittered(Duration::from_millis(400)),
            Duration::from_millis(150)
        );
        assert_eq!(
            config.next_delay(Duration::from_millis(100)),
            Duration::from_millis(200)
        );
    }
}
