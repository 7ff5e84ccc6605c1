use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use std::time::Duration;

use crate::metrics::Metrics;

// ============================================================================
// Circuit Breaker Pattern Implementation
// ============================================================================
//
// Guards a single external call path. One instance is shared (via Clone) by
// every concurrent caller of that path.
//
// States:
// - Closed: Normal operation, requests pass through
// - Open: Too many failures, requests rejected until the reset timeout elapses
// - HalfOpen: Probing recovery, any failure reopens immediately
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,     // Normal operation
    Open,       // Blocking requests
    HalfOpen,   // Testing recovery
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }

    /// Gauge encoding used by the metrics registry
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    state: Arc<Mutex<CircuitBreakerState>>,
    config: CircuitBreakerConfig,
    metrics: Option<Arc<Metrics>>,
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Time to wait after the last failure before probing recovery
    pub reset_timeout: Duration,
    /// Number of half-open successes needed to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            success_threshold: 1,
        }
    }
}

struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            state: Arc::new(Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            })),
            config,
            metrics: None,
        }
    }

    /// Report state and transitions to the Prometheus registry
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        metrics.update_circuit_breaker_state(&self.name, CircuitState::Closed);
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call may be attempted right now.
    ///
    /// The Open -> HalfOpen transition happens under the same lock as the
    /// timeout check, so only one caller can observe the expiry and flip the
    /// state.
    pub async fn can_execute(&self) -> bool {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let expired = state
                    .last_failure_time
                    .map(|last_failure| last_failure.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);

                if expired {
                    tracing::info!(breaker = %self.name, "Circuit breaker transitioning to HalfOpen");
                    self.transition(&mut state, CircuitState::HalfOpen);
                    state.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        if !self.can_execute().await {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match operation.await {
            Ok(result) => {
                self.record_success().await;
                Ok(result)
            }
            Err(err) => {
                self.record_failure().await;
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    tracing::info!(
                        breaker = %self.name,
                        successes = state.success_count,
                        "Circuit breaker closing, dependency recovered"
                    );
                    self.transition(&mut state, CircuitState::Closed);
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.last_failure_time = None;
                }
            }
            CircuitState::Closed => {
                // Reset failure count on success
                state.failure_count = 0;
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late
                tracing::warn!(breaker = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    pub async fn record_failure(&self) {
        let mut state = self.state.lock().await;

        state.last_failure_time = Some(Instant::now());

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = state.failure_count,
                        "Circuit breaker opening"
                    );
                    self.transition(&mut state, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(breaker = %self.name, "Failure during half-open, reopening circuit");
                self.transition(&mut state, CircuitState::Open);
                state.success_count = 0;
            }
            CircuitState::Open => {
                // Already open, the refreshed failure time extends the cooldown
            }
        }
    }

    fn transition(&self, state: &mut CircuitBreakerState, to: CircuitState) {
        let from = state.state;
        state.state = to;

        if let Some(metrics) = &self.metrics {
            metrics.record_circuit_breaker_transition(&self.name, from.as_str(), to.as_str());
            metrics.update_circuit_breaker_state(&self.name, to);
        }
    }

    pub async fn get_state(&self) -> CircuitState {
        let state = self.state.lock().await;
        state.state
    }

    pub async fn get_failure_count(&self) -> u32 {
        let state = self.state.lock().await;
        state.failure_count
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("operation failed: {0}")]
    OperationFailed(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, reset_timeout: Duration, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold,
                reset_timeout,
                success_threshold,
            },
        )
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_failures() {
        let cb = breaker(3, Duration::from_secs(1), 2);

        // First 3 failures should open the circuit
        for _ in 0..3 {
            let result = cb.call(async { Err::<(), _>("error") }).await;
            assert!(result.is_err());
        }

        assert_eq!(cb.get_state().await, CircuitState::Open);
        assert!(!cb.can_execute().await);

        // Next call should fail immediately
        let result = cb.call(async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count_while_closed() {
        let cb = breaker(3, Duration::from_secs(1), 1);

        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.get_failure_count().await, 2);

        cb.record_success().await;
        assert_eq!(cb.get_failure_count().await, 0);

        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.get_state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_open_until_reset_timeout() {
        let cb = breaker(2, Duration::from_secs(30), 1);
        cb.record_failure().await;
        cb.record_failure().await;

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!cb.can_execute().await);
        assert_eq!(cb.get_state().await, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.can_execute().await);
        assert_eq!(cb.get_state().await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_circuit_breaker_half_open_after_timeout() {
        let cb = breaker(2, Duration::from_millis(100), 1);

        // Open the circuit
        for _ in 0..2 {
            let _ = cb.call(async { Err::<(), _>("error") }).await;
        }

        assert_eq!(cb.get_state().await, CircuitState::Open);

        // Wait for timeout
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Should transition to half-open and allow the call
        let result = cb.call(async { Ok::<_, &str>(()) }).await;
        assert!(result.is_ok());

        // After success threshold, should be closed
        assert_eq!(cb.get_state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_needs_success_threshold() {
        let cb = breaker(1, Duration::from_secs(5), 3);
        cb.record_failure().await;

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.can_execute().await);

        cb.record_success().await;
        cb.record_success().await;
        assert_eq!(cb.get_state().await, CircuitState::HalfOpen);

        cb.record_success().await;
        assert_eq!(cb.get_state().await, CircuitState::Closed);
        assert_eq!(cb.get_failure_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_immediately() {
        let cb = breaker(3, Duration::from_secs(5), 3);
        for _ in 0..3 {
            cb.record_failure().await;
        }

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.can_execute().await);
        cb.record_success().await;

        // One failure is enough, regardless of the closed-state threshold
        cb.record_failure().await;
        assert_eq!(cb.get_state().await, CircuitState::Open);
        assert!(!cb.can_execute().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_half_open_trial_transitions_once() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let cb = breaker(1, Duration::from_secs(1), 5).with_metrics(metrics.clone());
        cb.record_failure().await;
        tokio::time::advance(Duration::from_secs(1)).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = cb.clone();
                tokio::spawn(async move { cb.can_execute().await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let transitions = metrics
            .circuit_breaker_transitions
            .with_label_values(&["test", "Open", "HalfOpen"])
            .get();
        assert_eq!(transitions, 1);
    }
}
