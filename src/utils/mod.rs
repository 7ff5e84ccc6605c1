pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use rate_limiter::{RateLimitError, RateLimiter};
pub use retry::{RetryConfig, RetryError, RetryExecutor};
