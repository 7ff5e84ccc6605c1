use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};
use kameo::reply::{Reply, ReplyError};
use kameo::prelude::*;
use kameo::Actor;

use crate::actors::core::{ComponentHealth, HealthStatus};
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitState};

// ============================================================================
// Health Monitor Actor - Monitors system health
// ============================================================================
//
// Responsibilities:
// - Track health reported by the relay and the consumers
// - Poll circuit breakers and translate their state into health
// - Aggregate system-wide health for GET /health
// - Mirror component health into the metrics registry
//
// ============================================================================

// ============================================================================
// Messages
// ============================================================================

pub struct UpdateHealth {
    pub component: String,
    pub status: HealthStatus,
    pub details: Option<String>,
}

pub struct GetSystemHealth;

#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: chrono::DateTime<Utc>,
}

// Implement Reply for SystemHealth to use it as a message reply type
impl Reply for SystemHealth {
    type Ok = Self;
    type Error = Infallible;
    type Value = Self;

    fn to_result(self) -> Result<Self, Infallible> {
        Ok(self)
    }

    fn into_any_err(self) -> Option<Box<dyn ReplyError>> {
        None
    }

    fn into_value(self) -> Self::Value {
        self
    }
}

fn breaker_health(state: CircuitState) -> HealthStatus {
    match state {
        CircuitState::Closed => HealthStatus::Healthy,
        CircuitState::HalfOpen => HealthStatus::Degraded("Circuit breaker half-open".to_string()),
        CircuitState::Open => HealthStatus::Unhealthy("Circuit breaker open".to_string()),
    }
}

// ============================================================================
// Health Monitor Actor
// ============================================================================

pub struct HealthMonitorActor {
    components: HashMap<String, ComponentHealth>,
    breakers: Vec<CircuitBreaker>,
    poll_interval: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl HealthMonitorActor {
    pub fn new(breakers: Vec<CircuitBreaker>, poll_interval: Duration) -> Self {
        Self {
            components: HashMap::new(),
            breakers,
            poll_interval,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Spawn the actor on the current runtime
    pub fn start(self) -> ActorRef<Self> {
        Self::spawn(self)
    }

    fn compute_overall_status(&self) -> HealthStatus {
        let mut has_degraded = false;
        let mut unhealthy_components = Vec::new();

        for (name, health) in &self.components {
            match &health.status {
                HealthStatus::Unhealthy(msg) => {
                    unhealthy_components.push(format!("{}: {}", name, msg));
                }
                HealthStatus::Degraded(_) => {
                    has_degraded = true;
                }
                HealthStatus::Healthy => {}
            }
        }

        if !unhealthy_components.is_empty() {
            unhealthy_components.sort();
            HealthStatus::Unhealthy(unhealthy_components.join(", "))
        } else if has_degraded {
            HealthStatus::Degraded("Some components degraded".to_string())
        } else {
            HealthStatus::Healthy
        }
    }
}

impl Actor for HealthMonitorActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!(breakers = state.breakers.len(), "HealthMonitorActor started");

        let breakers = state.breakers.clone();
        let poll_interval = state.poll_interval;

        // Poll circuit breakers until the actor goes away
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                interval.tick().await;

                for breaker in &breakers {
                    let status = breaker_health(breaker.get_state().await);
                    let sent = actor_ref
                        .tell(UpdateHealth {
                            component: format!("circuit_breaker:{}", breaker.name()),
                            status,
                            details: None,
                        })
                        .send()
                        .await;

                    if sent.is_err() {
                        tracing::debug!("Health monitor stopped, ending breaker polling");
                        return;
                    }
                }
            }
        });

        Ok(state)
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<UpdateHealth> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, msg: UpdateHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if let Some(ref metrics) = self.metrics {
            metrics.update_component_health(&msg.component, &msg.status);
        }

        let changed = self
            .components
            .get(&msg.component)
            .map_or(true, |previous| previous.status != msg.status);
        if changed {
            tracing::info!(
                component = %msg.component,
                status = msg.status.label(),
                reason = msg.status.message().unwrap_or(""),
                "Component health changed"
            );
        }

        let health = ComponentHealth::new(msg.component.clone(), msg.status).with_details(msg.details);
        self.components.insert(msg.component, health);
    }
}

impl Message<GetSystemHealth> for HealthMonitorActor {
    type Reply = SystemHealth;

    async fn handle(&mut self, _msg: GetSystemHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        SystemHealth {
            overall_status: self.compute_overall_status(),
            components: self.components.clone(),
            check_time: Utc::now(),
        }
    }
}

// ============================================================================
// Health Reporter - handle given to long-running components
// ============================================================================

#[derive(Clone, Default)]
pub struct HealthReporter {
    monitor: Option<ActorRef<HealthMonitorActor>>,
}

impl HealthReporter {
    pub fn new(monitor: ActorRef<HealthMonitorActor>) -> Self {
        Self {
            monitor: Some(monitor),
        }
    }

    /// Reporter that drops every update
    pub fn disabled() -> Self {
        Self::default()
    }

    pub async fn report(&self, component: &str, status: HealthStatus, details: Option<String>) {
        if let Some(ref monitor) = self.monitor {
            let sent = monitor
                .tell(UpdateHealth {
                    component: component.to_string(),
                    status,
                    details,
                })
                .send()
                .await;

            if let Err(e) = sent {
                tracing::warn!(component, error = %e, "Failed to report health");
            }
        }
    }
}
