use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

use super::{OutboxClaim, OutboxError, OutboxStore};
use crate::actors::{HealthReporter, HealthStatus};
use crate::domain::time_record::DomainEvent;
use crate::messaging::EventPublisher;
use crate::metrics::Metrics;

// ============================================================================
// Outbox Relay - polls the outbox and hands rows to the broker publisher
// ============================================================================
//
// Each tick, per configured event type:
// 1. Claim a batch of unpublished rows (oldest first, SKIP LOCKED)
// 2. Publish each row
// 3. Mark published, or record the failure and leave the row eligible
// 4. Release the claim
//
// There is no backoff here: a failed row is retried on the next tick.
//
// ============================================================================

pub const COMPONENT: &str = "outbox_relay";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub event_types: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 100,
            event_types: DomainEvent::ALL_TYPES.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Outcome of one tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub claimed: usize,
    pub published: usize,
    pub failed: usize,
}

pub struct OutboxRelay<S: OutboxStore> {
    store: S,
    publisher: Arc<dyn EventPublisher>,
    config: RelayConfig,
    metrics: Option<Arc<Metrics>>,
    health: HealthReporter,
    span: Span,
}

impl<S: OutboxStore> OutboxRelay<S> {
    pub fn new(store: S, publisher: Arc<dyn EventPublisher>, config: RelayConfig) -> Self {
        Self {
            store,
            publisher,
            config,
            metrics: None,
            health: HealthReporter::disabled(),
            span: tracing::info_span!("outbox_relay"),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_health(mut self, health: HealthReporter) -> Self {
        self.health = health;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Run one poll cycle over every configured event type
    pub async fn tick(&self) -> Result<RelayStats, OutboxError> {
        let started = Instant::now();
        let mut stats = RelayStats::default();

        for event_type in &self.config.event_types {
            let batch = self.relay_type(event_type).await?;
            stats.claimed += batch.claimed;
            stats.published += batch.published;
            stats.failed += batch.failed;
        }

        if let Some(ref metrics) = self.metrics {
            metrics.record_relay_cycle(started.elapsed().as_secs_f64());
        }

        if stats.claimed > 0 {
            info!(
                claimed = stats.claimed,
                published = stats.published,
                failed = stats.failed,
                "📬 Relay cycle finished"
            );
        }

        Ok(stats)
    }

    async fn relay_type(&self, event_type: &str) -> Result<RelayStats, OutboxError> {
        let mut claim = self.store.claim_batch(event_type, self.config.batch_size).await?;
        let events = claim.events().to_vec();
        let mut stats = RelayStats {
            claimed: events.len(),
            ..RelayStats::default()
        };

        for event in events {
            let delivered = self.publisher.deliver(&event.event_type, &event.payload).await;

            if let Some(ref metrics) = self.metrics {
                metrics.record_outbox_publish(&event.event_type, delivered.is_ok());
            }

            match delivered {
                Ok(()) => {
                    claim.mark_published(event.id).await?;
                    stats.published += 1;

                    debug!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        aggregate_id = %event.aggregate_id,
                        "Published outbox event"
                    );
                }
                Err(e) => {
                    claim.record_failure(event.id, &e.to_string()).await?;
                    stats.failed += 1;

                    warn!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        retry_count = event.retry_count + 1,
                        error = %e,
                        "Failed to publish outbox event, will retry next cycle"
                    );
                }
            }
        }

        claim.release().await?;

        Ok(stats)
    }

    /// Poll until cancelled. Errors are logged and the next tick retries.
    pub async fn run(self, shutdown: CancellationToken) {
        let span = self.span.clone();

        async move {
            info!(
                poll_interval_ms = self.config.poll_interval.as_millis() as u64,
                batch_size = self.config.batch_size,
                event_types = ?self.config.event_types,
                "🔄 Outbox relay started"
            );
            self.health.report(COMPONENT, HealthStatus::Healthy, None).await;

            let mut interval = tokio::time::interval(self.config.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                match self.tick().await {
                    Ok(stats) if stats.failed > 0 => {
                        let details = format!("{} of {} events failed to publish", stats.failed, stats.claimed);
                        self.health
                            .report(COMPONENT, HealthStatus::Degraded(details), None)
                            .await;
                    }
                    Ok(_) => {
                        self.health.report(COMPONENT, HealthStatus::Healthy, None).await;
                    }
                    Err(e) => {
                        error!(error = %e, "Outbox relay cycle failed");
                        self.health
                            .report(COMPONENT, HealthStatus::Unhealthy(e.to_string()), None)
                            .await;
                    }
                }
            }

            info!("🛑 Outbox relay stopped");
        }
        .instrument(span)
        .await
    }
}
