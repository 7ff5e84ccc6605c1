use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::metrics::Metrics;

// ============================================================================
// Token Bucket Rate Limiter
// ============================================================================
//
// Fractional token bucket refilled lazily from elapsed time on every call.
// There is no background refill task. Waiting is bounded by the caller's
// budget: if the next token cannot arrive within it, the call fails at once.
//
// ============================================================================

// Absorbs float drift after sleeping exactly the computed wait
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RateLimitError {
    #[error("rate limit requires {required:?} wait, remaining budget is {budget:?}")]
    WaitExceedsBudget { required: Duration, budget: Duration },
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Clone)]
pub struct RateLimiter {
    name: Arc<str>,
    capacity: f64,
    refill_per_sec: f64,
    state: Arc<Mutex<BucketState>>,
    metrics: Option<Arc<Metrics>>,
}

impl RateLimiter {
    /// Bucket starts full
    pub fn new(name: impl Into<String>, capacity: f64, refill_per_sec: f64) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            capacity,
            refill_per_sec,
            state: Arc::new(Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
            metrics: None,
        }
    }

    /// `requests_per_minute` burst capacity, refilled evenly over a minute
    pub fn per_minute(name: impl Into<String>, requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute as f64;
        Self::new(name, capacity, capacity / 60.0)
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Take one token, sleeping for it if the wait fits in `max_wait`.
    ///
    /// Returns the total time spent waiting.
    pub async fn wait_for_token(&self, max_wait: Duration) -> Result<Duration, RateLimitError> {
        let mut waited = Duration::ZERO;
        let mut budget = max_wait;

        loop {
            let required = match self.try_acquire().await {
                None => {
                    self.record(if waited.is_zero() { "immediate" } else { "waited" });
                    return Ok(waited);
                }
                Some(required) => required,
            };

            if required > budget {
                tracing::warn!(
                    limiter = %self.name,
                    required_ms = required.as_millis() as u64,
                    budget_ms = budget.as_millis() as u64,
                    "Rate limit wait exceeds budget"
                );
                self.record("rejected");
                return Err(RateLimitError::WaitExceedsBudget { required, budget });
            }

            tracing::debug!(
                limiter = %self.name,
                wait_ms = required.as_millis() as u64,
                "Waiting for rate limit token"
            );
            sleep(required).await;
            waited += required;
            budget -= required;
        }
    }

    /// Refill, then either consume a token (None) or report the wait needed.
    async fn try_acquire(&self) -> Option<Duration> {
        let mut state = self.state.lock().await;

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        if state.tokens + TOKEN_EPSILON >= 1.0 {
            state.tokens = (state.tokens - 1.0).max(0.0);
            return None;
        }

        let deficit = 1.0 - state.tokens;
        let nanos = (deficit / self.refill_per_sec * 1e9).ceil();
        Some(Duration::from_nanos(nanos as u64))
    }

    /// Current token count after a refill
    pub async fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
        state.tokens
    }

    fn record(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_rate_limit(&self.name, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_capacity_requests_pass_without_waiting() {
        let limiter = RateLimiter::new("test", 3.0, 1.0);

        for _ in 0..3 {
            let waited = limiter.wait_for_token(Duration::ZERO).await.unwrap();
            assert_eq!(waited, Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_request_waits_computed_duration() {
        // Two tokens per second: an empty bucket needs 500ms for the next one
        let limiter = RateLimiter::new("test", 2.0, 2.0);
        limiter.wait_for_token(Duration::ZERO).await.unwrap();
        limiter.wait_for_token(Duration::ZERO).await.unwrap();

        let started = Instant::now();
        let waited = limiter.wait_for_token(Duration::from_secs(1)).await.unwrap();

        assert_eq!(waited, Duration::from_millis(500));
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_without_blocking_when_budget_too_small() {
        let limiter = RateLimiter::new("test", 1.0, 0.5);
        limiter.wait_for_token(Duration::ZERO).await.unwrap();

        let started = Instant::now();
        let err = limiter.wait_for_token(Duration::from_secs(1)).await.unwrap_err();

        assert_eq!(
            err,
            RateLimitError::WaitExceedsBudget {
                required: Duration::from_secs(2),
                budget: Duration::from_secs(1),
            }
        );
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_lazy_and_capped() {
        let limiter = RateLimiter::new("test", 2.0, 1.0);
        limiter.wait_for_token(Duration::ZERO).await.unwrap();
        limiter.wait_for_token(Duration::ZERO).await.unwrap();

        tokio::time::advance(Duration::from_millis(1500)).await;
        let tokens = limiter.available_tokens().await;
        assert!((tokens - 1.5).abs() < 1e-6);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.available_tokens().await, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_minute_refill_rate() {
        let limiter = RateLimiter::per_minute("legacy", 60);
        assert_eq!(limiter.capacity(), 60.0);

        for _ in 0..60 {
            limiter.wait_for_token(Duration::ZERO).await.unwrap();
        }
        let waited = limiter.wait_for_token(Duration::from_secs(5)).await.unwrap();
        assert_eq!(waited, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_are_counted() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let limiter = RateLimiter::new("legacy", 1.0, 0.1).with_metrics(metrics.clone());

        limiter.wait_for_token(Duration::ZERO).await.unwrap();
        let _ = limiter.wait_for_token(Duration::ZERO).await;

        assert_eq!(
            metrics.rate_limiter_requests.with_label_values(&["legacy", "immediate"]).get(),
            1
        );
        assert_eq!(
            metrics.rate_limiter_requests.with_label_values(&["legacy", "rejected"]).get(),
            1
        );
    }
}
