use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::external::ExternalError;
use crate::utils::{
    CircuitBreaker, CircuitBreakerError, RateLimitError, RateLimiter, RetryError, RetryExecutor,
};

// ============================================================================
// Resilience Policy - retry ∘ circuit breaker ∘ rate limiter
// ============================================================================
//
// Every attempt made by the retry executor:
// 1. takes a rate limiter token within the configured wait budget
// 2. runs the call through the breaker (open breaker = fast failure),
//    which records the outcome
//
// A fast failure consumes an attempt and its backoff like any other failure.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ResilienceError {
    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    #[error(transparent)]
    External(#[from] ExternalError),
}

#[derive(Clone)]
pub struct ResiliencePolicy {
    retry: RetryExecutor,
    breaker: CircuitBreaker,
    limiter: Option<RateLimiter>,
    token_wait: Duration,
}

impl ResiliencePolicy {
    pub fn new(retry: RetryExecutor, breaker: CircuitBreaker) -> Self {
        Self {
            retry,
            breaker,
            limiter: None,
            token_wait: Duration::ZERO,
        }
    }

    /// Gate every attempt on a token, waiting at most `token_wait` for it
    pub fn with_rate_limiter(mut self, limiter: RateLimiter, token_wait: Duration) -> Self {
        self.limiter = Some(limiter);
        self.token_wait = token_wait;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn execute<F, Fut, T>(&self, mut call: F) -> Result<T, RetryError<ResilienceError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExternalError>>,
    {
        self.retry
            .execute(|_attempt| {
                let operation = call();
                async move { self.attempt(operation).await }
            })
            .await
    }

    async fn attempt<T>(
        &self,
        operation: impl Future<Output = Result<T, ExternalError>>,
    ) -> Result<T, ResilienceError> {
        if let Some(ref limiter) = self.limiter {
            limiter.wait_for_token(self.token_wait).await?;
        }

        self.breaker.call(operation).await.map_err(|e| match e {
            CircuitBreakerError::CircuitOpen => ResilienceError::CircuitOpen(self.breaker.name().to_string()),
            CircuitBreakerError::OperationFailed(e) => {
                warn!(breaker = %self.breaker.name(), error = %e, "External call failed");
                ResilienceError::External(e)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{CircuitBreakerConfig, CircuitState, RetryConfig};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retry(max_attempts: u32) -> RetryExecutor {
        RetryExecutor::new(
            "legacy_api",
            RetryConfig {
                max_attempts,
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(100),
                multiplier: 2.0,
            },
        )
    }

    fn breaker(failure_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "legacy_api",
            CircuitBreakerConfig {
                failure_threshold,
                reset_timeout: Duration::from_secs(60),
                success_threshold: 1,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let policy = ResiliencePolicy::new(retry(5), breaker(5));
        let calls = AtomicU32::new(0);

        let result = policy
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ExternalError::UnexpectedStatus(503))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(policy.breaker().get_state().await, CircuitState::Closed);
        assert_eq!(policy.breaker().get_failure_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_fast_fails_remaining_attempts() {
        let policy = ResiliencePolicy::new(retry(5), breaker(2));
        let calls = AtomicU32::new(0);

        let err = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ExternalError::UnexpectedStatus(500)) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 5);
        assert!(matches!(err.last_error, ResilienceError::CircuitOpen(_)));
        assert_eq!(policy.breaker().get_state().await, CircuitState::Open);
        // Closures are invoked every attempt but only two calls reached the dependency
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(err.history.iter().filter(|h| h.contains("is open")).count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_rejection_counts_as_attempt() {
        let limiter = RateLimiter::new("legacy_api", 1.0, 0.001);
        let policy = ResiliencePolicy::new(retry(2), breaker(5))
            .with_rate_limiter(limiter, Duration::from_millis(5));

        let err = policy
            .execute(|| async { Err::<(), _>(ExternalError::UnexpectedStatus(500)) })
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 2);
        assert!(matches!(err.last_error, ResilienceError::RateLimited(_)));
        assert_eq!(policy.breaker().get_failure_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_attempts_leave_breaker_closed() {
        let limiter = RateLimiter::new("legacy_api", 0.0, 0.001);
        let policy = ResiliencePolicy::new(retry(3), breaker(1))
            .with_rate_limiter(limiter, Duration::from_millis(5));
        let reached = AtomicU32::new(0);

        let err = policy
            .execute(|| async {
                reached.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ExternalError::UnexpectedStatus(500))
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert!(matches!(err.last_error, ResilienceError::RateLimited(_)));
        assert_eq!(reached.load(Ordering::SeqCst), 0);
        assert_eq!(policy.breaker().get_state().await, CircuitState::Closed);
    }
}
