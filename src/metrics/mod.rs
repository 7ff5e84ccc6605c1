use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
};

use crate::actors::HealthStatus;
use crate::utils::CircuitState;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers:
// - Outbox relay throughput and failures
// - Consumer outcomes (ack / requeue / dead_letter) and handler latency
// - Retry attempts and outcomes
// - Circuit breaker state transitions
// - Rate limiter decisions
// - Component health
//
// Exposed at /metrics by the HTTP server.
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Outbox Relay Metrics
    pub outbox_events_published: IntCounterVec,
    pub outbox_publish_failures: IntCounterVec,
    pub outbox_relay_cycle_duration: Histogram,

    // Consumer Metrics
    pub consumer_messages: IntCounterVec,
    pub handler_duration: HistogramVec,

    // Retry Metrics
    pub retry_attempts_total: IntCounterVec,
    pub retry_success: IntCounterVec,
    pub retry_failure: IntCounterVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGaugeVec,
    pub circuit_breaker_transitions: IntCounterVec,

    // Rate Limiter Metrics
    pub rate_limiter_requests: IntCounterVec,

    // Health
    pub component_health_status: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let outbox_events_published = IntCounterVec::new(
            Opts::new("outbox_events_published_total", "Outbox rows published to the broker"),
            &["event_type"],
        )?;
        registry.register(Box::new(outbox_events_published.clone()))?;

        let outbox_publish_failures = IntCounterVec::new(
            Opts::new("outbox_publish_failures_total", "Outbox rows that failed to publish"),
            &["event_type"],
        )?;
        registry.register(Box::new(outbox_publish_failures.clone()))?;

        let outbox_relay_cycle_duration = Histogram::with_opts(
            HistogramOpts::new("outbox_relay_cycle_duration_seconds", "Duration of one relay poll cycle")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(outbox_relay_cycle_duration.clone()))?;

        let consumer_messages = IntCounterVec::new(
            Opts::new("consumer_messages_total", "Deliveries settled by consumers"),
            &["queue", "outcome"],
        )?;
        registry.register(Box::new(consumer_messages.clone()))?;

        let handler_duration = HistogramVec::new(
            HistogramOpts::new("handler_duration_seconds", "Event handler processing duration")
                .buckets(vec![0.005, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
            &["queue"],
        )?;
        registry.register(Box::new(handler_duration.clone()))?;

        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total retry attempts"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        let retry_success = IntCounterVec::new(
            Opts::new("retry_success_total", "Operations that eventually succeeded"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_success.clone()))?;

        let retry_failure = IntCounterVec::new(
            Opts::new("retry_failure_total", "Operations that failed after all attempts"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_failure.clone()))?;

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new("circuit_breaker_state", "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)"),
            &["breaker"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["breaker", "from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        let rate_limiter_requests = IntCounterVec::new(
            Opts::new("rate_limiter_requests_total", "Token requests by outcome"),
            &["limiter", "outcome"],
        )?;
        registry.register(Box::new(rate_limiter_requests.clone()))?;

        let component_health_status = IntGaugeVec::new(
            Opts::new("component_health_status", "Component health (0=Unhealthy, 1=Degraded, 2=Healthy)"),
            &["component"],
        )?;
        registry.register(Box::new(component_health_status.clone()))?;

        Ok(Self {
            registry,
            outbox_events_published,
            outbox_publish_failures,
            outbox_relay_cycle_duration,
            consumer_messages,
            handler_duration,
            retry_attempts_total,
            retry_success,
            retry_failure,
            circuit_breaker_state,
            circuit_breaker_transitions,
            rate_limiter_requests,
            component_health_status,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_outbox_publish(&self, event_type: &str, success: bool) {
        if success {
            self.outbox_events_published.with_label_values(&[event_type]).inc();
        } else {
            self.outbox_publish_failures.with_label_values(&[event_type]).inc();
        }
    }

    pub fn record_relay_cycle(&self, duration_secs: f64) {
        self.outbox_relay_cycle_duration.observe(duration_secs);
    }

    pub fn record_delivery(&self, queue: &str, outcome: &str, duration_secs: f64) {
        self.consumer_messages.with_label_values(&[queue, outcome]).inc();
        self.handler_duration.with_label_values(&[queue]).observe(duration_secs);
    }

    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        let attempt = attempt.to_string();
        self.retry_attempts_total
            .with_label_values(&[operation, attempt.as_str()])
            .inc();
    }

    pub fn record_retry_outcome(&self, operation: &str, success: bool) {
        if success {
            self.retry_success.with_label_values(&[operation]).inc();
        } else {
            self.retry_failure.with_label_values(&[operation]).inc();
        }
    }

    pub fn update_circuit_breaker_state(&self, breaker: &str, state: CircuitState) {
        self.circuit_breaker_state
            .with_label_values(&[breaker])
            .set(state.as_gauge());
    }

    pub fn record_circuit_breaker_transition(&self, breaker: &str, from_state: &str, to_state: &str) {
        self.circuit_breaker_transitions
            .with_label_values(&[breaker, from_state, to_state])
            .inc();
    }

    pub fn record_rate_limit(&self, limiter: &str, outcome: &str) {
        self.rate_limiter_requests.with_label_values(&[limiter, outcome]).inc();
    }

    pub fn update_component_health(&self, component: &str, status: &HealthStatus) {
        let value = match status {
            HealthStatus::Unhealthy(_) => 0,
            HealthStatus::Degraded(_) => 1,
            HealthStatus::Healthy => 2,
        };
        self.component_health_status.with_label_values(&[component]).set(value);
    }
}
