use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::metrics::Metrics;

// ============================================================================
// Exponential Backoff Retry Strategy
// ============================================================================
//
// Bounded retry with geometric backoff. The sleep happens on the calling
// task, so a consumer retrying a failing dependency stops pulling new
// deliveries until the budget is spent.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay slept after the given failed attempt (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_backoff.min(self.max_backoff);
        for _ in 1..attempt {
            delay = next_backoff(delay, self.multiplier, self.max_backoff);
        }
        delay
    }
}

fn next_backoff(current: Duration, multiplier: f64, max: Duration) -> Duration {
    // NaN and shrinking multipliers keep the delay constant
    let multiplier = if multiplier >= 1.0 { multiplier } else { 1.0 };
    let next = current.as_secs_f64() * multiplier;
    if next >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(next)
    }
}

/// Every attempt failed
#[derive(Debug, thiserror::Error)]
#[error("operation failed after {attempts} attempts: {last_error}")]
pub struct RetryError<E: std::fmt::Display + std::fmt::Debug> {
    pub attempts: u32,
    pub last_error: E,
    /// Rendered error of every attempt, oldest first
    pub history: Vec<String>,
}

#[derive(Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    operation: Arc<str>,
    metrics: Option<Arc<Metrics>>,
}

impl RetryExecutor {
    pub fn new(operation: impl Into<String>, config: RetryConfig) -> Self {
        let operation: String = operation.into();
        Self {
            config,
            operation: Arc::from(operation),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation with exponential backoff retry.
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display + std::fmt::Debug,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        let mut delay = self.config.initial_backoff.min(self.config.max_backoff);
        let mut history = Vec::new();

        loop {
            attempt += 1;

            tracing::debug!(
                operation = %self.operation,
                attempt = attempt,
                max_attempts = max_attempts,
                "Attempting operation"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_retry_attempt(&self.operation, attempt);
            }

            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::info!(
                            operation = %self.operation,
                            attempt = attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    if let Some(metrics) = &self.metrics {
                        metrics.record_retry_outcome(&self.operation, true);
                    }
                    return Ok(result);
                }
                Err(error) => {
                    history.push(error.to_string());

                    if attempt >= max_attempts {
                        tracing::error!(
                            operation = %self.operation,
                            attempt = attempt,
                            error = %error,
                            "Operation failed after all retries"
                        );
                        if let Some(metrics) = &self.metrics {
                            metrics.record_retry_outcome(&self.operation, false);
                        }
                        return Err(RetryError {
                            attempts: attempt,
                            last_error: error,
                            history,
                        });
                    }

                    tracing::warn!(
                        operation = %self.operation,
                        attempt = attempt,
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "Operation failed, retrying after delay"
                    );

                    sleep(delay).await;

                    delay = next_backoff(delay, self.config.multiplier, self.config.max_backoff);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn config(max_attempts: u32, initial_ms: u64, max_ms: u64) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(initial_ms),
            max_backoff: Duration::from_millis(max_ms),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let executor = RetryExecutor::new("test", config(3, 10, 100));

        let result = executor
            .execute(|_attempt| {
                let counter = counter_clone.clone();
                async move {
                    let count = counter.fetch_add(1, Ordering::SeqCst);
                    if count < 2 {
                        Err("temporary failure")
                    } else {
                        Ok("success")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_fails_after_max_attempts() {
        let executor = RetryExecutor::new("test", config(2, 10, 100));

        let result = executor
            .execute(|attempt| async move { Err::<(), _>(format!("failure {attempt}")) })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(err.last_error, "failure 2");
        assert_eq!(err.history, vec!["failure 1", "failure 2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_covers_capped_backoffs() {
        // Sleeps: 100ms, 200ms, then capped at 250ms
        let executor = RetryExecutor::new("test", config(4, 100, 250));
        let started = Instant::now();

        let result = executor
            .execute(|attempt| async move {
                if attempt < 4 {
                    Err("not yet")
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 4);
        assert!(started.elapsed() >= Duration::from_millis(550));
    }

    #[test]
    fn test_backoff_schedule_is_capped() {
        let config = config(6, 1000, 5000);
        let schedule: Vec<u64> = (1..=5).map(|a| config.backoff_after(a).as_millis() as u64).collect();
        assert_eq!(schedule, vec![1000, 2000, 4000, 5000, 5000]);
    }

    #[tokio::test]
    async fn test_metrics_record_attempts_and_outcome() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let executor = RetryExecutor::new("legacy_api", config(2, 1, 1)).with_metrics(metrics.clone());

        let _ = executor.execute(|_| async { Err::<(), _>("down") }).await;

        assert_eq!(metrics.retry_failure.with_label_values(&["legacy_api"]).get(), 1);
        assert_eq!(
            metrics.retry_attempts_total.with_label_values(&["legacy_api", "2"]).get(),
            1
        );
    }

    #[test]
    fn test_backoff_ignores_invalid_multipliers() {
        for multiplier in [f64::NAN, -2.0, 0.5] {
            let config = RetryConfig {
                multiplier,
                ..config(5, 100, 1_000)
            };
            assert_eq!(config.backoff_after(4), Duration::from_millis(100));
        }

        let config = RetryConfig {
            multiplier: f64::INFINITY,
            ..config(5, 100, 1_000)
        };
        assert_eq!(config.backoff_after(2), Duration::from_millis(1_000));
    }
}
