use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::time_record::DomainEvent;
use crate::metrics::Metrics;

pub mod memory;
pub mod rabbitmq;
pub mod topology;

pub use memory::{MemoryBroker, MemoryConsumer, MemoryPublisher};
pub use rabbitmq::{RabbitConsumer, RabbitPublisher};
pub use topology::QueueTopology;

// ============================================================================
// Messaging Ports
// ============================================================================
//
// Publisher side:  deliver(event_type, bytes) onto a fanout exchange
// Consumer side:   handle(bytes) per queue, settled as ack / requeue / dead-letter
//
// Both RabbitMQ and the in-memory broker implement the same contracts.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("broker did not confirm message of type {0}")]
    NotConfirmed(String),

    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("queue {0} is not declared")]
    UnknownQueue(String),

    #[error("delivery stream for {0} closed by broker")]
    StreamClosed(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// The payload can never be processed; retrying will not help
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("handler failed: {0}")]
    Failed(String),
}

/// Publish primitive used by the outbox relay
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn deliver(&self, event_type: &str, payload: &[u8]) -> Result<(), PublishError>;

    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let payload = event.to_payload()?;
        self.deliver(event.event_type(), &payload).await
    }
}

/// Per-queue business callback
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError>;
}

/// How a delivery is settled with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// nack with requeue; the queue TTL eventually dead-letters it
    Requeue,
    /// nack without requeue; the queue DLX routes it to the DLQ now
    DeadLetter,
}

impl Disposition {
    pub fn for_result(result: &Result<(), HandlerError>, reject_malformed: bool) -> Self {
        match result {
            Ok(()) => Disposition::Ack,
            Err(HandlerError::Malformed(_)) if reject_malformed => Disposition::DeadLetter,
            Err(_) => Disposition::Requeue,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Requeue => "requeue",
            Disposition::DeadLetter => "dead_letter",
        }
    }
}

/// Run the handler on one delivery and decide how to settle it.
///
/// Cancellation drops the handler mid-flight (retry backoff and rate limit
/// waits included) and requeues the message.
pub(crate) async fn process_delivery(
    handler: &Arc<dyn MessageHandler>,
    queue: &str,
    payload: &[u8],
    redelivered: bool,
    reject_malformed: bool,
    metrics: Option<&Metrics>,
    shutdown: &CancellationToken,
) -> Disposition {
    if redelivered {
        tracing::debug!(queue, "Processing redelivered message");
    }

    let started = Instant::now();
    let result = tokio::select! {
        biased;
        _ = shutdown.cancelled() => {
            tracing::info!(queue, "Shutdown during delivery, requeueing message");
            if let Some(metrics) = metrics {
                metrics.record_delivery(queue, Disposition::Requeue.as_str(), started.elapsed().as_secs_f64());
            }
            return Disposition::Requeue;
        }
        result = handler.handle(payload) => result,
    };
    let disposition = Disposition::for_result(&result, reject_malformed);

    match &result {
        Ok(()) => tracing::debug!(queue, "Message handled"),
        Err(e) => tracing::warn!(
            queue,
            error = %e,
            disposition = disposition.as_str(),
            "Message handling failed"
        ),
    }

    if let Some(metrics) = metrics {
        metrics.record_delivery(queue, disposition.as_str(), started.elapsed().as_secs_f64());
    }

    disposition
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_mapping() {
        assert_eq!(Disposition::for_result(&Ok(()), true), Disposition::Ack);
        assert_eq!(
            Disposition::for_result(&Err(HandlerError::Failed("api down".into())), true),
            Disposition::Requeue
        );
        assert_eq!(
            Disposition::for_result(&Err(HandlerError::Malformed("bad json".into())), true),
            Disposition::DeadLetter
        );
        assert_eq!(
            Disposition::for_result(&Err(HandlerError::Malformed("bad json".into())), false),
            Disposition::Requeue
        );
    }

    struct Stalled;

    #[async_trait]
    impl MessageHandler for Stalled {
        async fn handle(&self, _payload: &[u8]) -> Result<(), HandlerError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_shutdown_requeues_in_flight_delivery() {
        let handler: Arc<dyn MessageHandler> = Arc::new(Stalled);
        let shutdown = CancellationToken::new();

        let cancel = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let disposition = process_delivery(&handler, "email-queue", b"{}", false, true, None, &shutdown).await;
        assert_eq!(disposition, Disposition::Requeue);
    }
}
