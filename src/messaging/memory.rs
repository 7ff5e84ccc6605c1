use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument, Span};

use super::topology::QueueTopology;
use super::{process_delivery, ConsumerError, Disposition, EventPublisher, MessageHandler, PublishError};
use crate::metrics::Metrics;

// ============================================================================
// In-Memory Broker - fanout exchanges, TTL and dead-lettering
// ============================================================================
//
// Mirrors the RabbitMQ behaviour the pipeline depends on:
// - a fanout exchange copies each message to every bound queue
// - an unacked message is either acked, requeued at the head, or rejected
// - TTL runs from the original enqueue time and survives requeues
// - expired or rejected messages move to the queue's DLQ with a death record
//
// Expiry is checked when a consumer asks for the next message, which is when
// RabbitMQ drops expired messages from the head of a queue as well.
//
// ============================================================================

const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeathReason {
    Expired,
    Rejected,
}

/// Broker-side copy of one message
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub event_type: String,
    pub payload: Vec<u8>,
    pub enqueued_at: Instant,
    pub redelivered: bool,
    pub delivery_count: u32,
    /// Set once the message has been dead-lettered (x-death equivalent)
    pub death: Option<(String, DeathReason)>,
}

struct QueueState {
    messages: VecDeque<BrokerMessage>,
    message_ttl: Option<Duration>,
    dead_letter_queue: Option<String>,
}

impl QueueState {
    fn plain() -> Self {
        Self {
            messages: VecDeque::new(),
            message_ttl: None,
            dead_letter_queue: None,
        }
    }
}

#[derive(Default)]
struct BrokerState {
    bindings: HashMap<String, Vec<String>>,
    queues: HashMap<String, QueueState>,
    available: bool,
    published: u64,
}

impl BrokerState {
    fn dead_letter(&mut self, queue: &str, mut message: BrokerMessage, reason: DeathReason) {
        let dlq = self.queues.get(queue).and_then(|q| q.dead_letter_queue.clone());

        match dlq.and_then(|name| self.queues.get_mut(&name)) {
            Some(target) => {
                message.death = Some((queue.to_string(), reason));
                message.redelivered = false;
                message.enqueued_at = Instant::now();
                target.messages.push_back(message);
            }
            None => {
                tracing::warn!(queue, ?reason, "Message dropped, queue has no DLQ");
            }
        }
    }

    fn expire_head(&mut self, queue: &str) {
        loop {
            let expired = match self.queues.get_mut(queue) {
                Some(state) => match (state.message_ttl, state.messages.front()) {
                    (Some(ttl), Some(head)) if head.enqueued_at.elapsed() >= ttl => {
                        state.messages.pop_front()
                    }
                    _ => None,
                },
                None => None,
            };

            match expired {
                Some(message) => {
                    tracing::info!(queue, event_type = %message.event_type, "Message expired, dead-lettering");
                    self.dead_letter(queue, message, DeathReason::Expired);
                }
                None => return,
            }
        }
    }
}

#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                available: true,
                ..BrokerState::default()
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Declare queue, DLQ and binding, like the RabbitMQ consumer does on start
    pub fn declare(&self, topology: &QueueTopology) {
        let mut state = self.state.lock();

        state
            .queues
            .entry(topology.dead_letter_queue.clone())
            .or_insert_with(QueueState::plain);

        let queue = state.queues.entry(topology.queue.clone()).or_insert_with(QueueState::plain);
        queue.message_ttl = Some(topology.message_ttl);
        queue.dead_letter_queue = Some(topology.dead_letter_queue.clone());

        let bound = state.bindings.entry(topology.exchange.clone()).or_default();
        if !bound.contains(&topology.queue) {
            bound.push(topology.queue.clone());
        }
    }

    /// Simulate the broker going away or coming back
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    pub fn publish(&self, exchange: &str, event_type: &str, payload: &[u8]) -> Result<(), PublishError> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(PublishError::Unavailable("in-memory broker offline".into()));
        }

        state.published += 1;
        let targets = state.bindings.get(exchange).cloned().unwrap_or_default();
        for queue in targets {
            if let Some(q) = state.queues.get_mut(&queue) {
                q.messages.push_back(BrokerMessage {
                    event_type: event_type.to_string(),
                    payload: payload.to_vec(),
                    enqueued_at: Instant::now(),
                    redelivered: false,
                    delivery_count: 0,
                    death: None,
                });
            }
        }
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }

    /// Total messages accepted by any exchange
    pub fn published_count(&self) -> u64 {
        self.state.lock().published
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.state.lock().queues.get(queue).map_or(0, |q| q.messages.len())
    }

    /// Snapshot of a queue without consuming it
    pub fn peek(&self, queue: &str) -> Vec<BrokerMessage> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn take_next(&self, queue: &str) -> Result<Option<BrokerMessage>, ConsumerError> {
        let mut state = self.state.lock();
        if !state.queues.contains_key(queue) {
            return Err(ConsumerError::UnknownQueue(queue.to_string()));
        }

        state.expire_head(queue);

        Ok(state.queues.get_mut(queue).and_then(|q| q.messages.pop_front()).map(|mut m| {
            m.delivery_count += 1;
            m
        }))
    }

    fn settle(&self, queue: &str, mut message: BrokerMessage, disposition: Disposition) {
        let mut state = self.state.lock();
        match disposition {
            Disposition::Ack => {}
            Disposition::Requeue => {
                message.redelivered = true;
                if let Some(q) = state.queues.get_mut(queue) {
                    q.messages.push_front(message);
                }
            }
            Disposition::DeadLetter => state.dead_letter(queue, message, DeathReason::Rejected),
        }
        drop(state);

        self.notify.notify_waiters();
    }

    async fn next_delivery(&self, queue: &str, shutdown: &CancellationToken) -> Result<Option<BrokerMessage>, ConsumerError> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(None);
            }

            let notified = self.notify.notified();
            if let Some(message) = self.take_next(queue)? {
                return Ok(Some(message));
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(None),
                _ = notified => {}
                _ = tokio::time::sleep(IDLE_POLL) => {}
            }
        }
    }
}

/// Publisher bound to one exchange of a [`MemoryBroker`]
#[derive(Clone)]
pub struct MemoryPublisher {
    broker: MemoryBroker,
    exchange: String,
}

impl MemoryPublisher {
    pub fn new(broker: MemoryBroker, exchange: impl Into<String>) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn deliver(&self, event_type: &str, payload: &[u8]) -> Result<(), PublishError> {
        self.broker.publish(&self.exchange, event_type, payload)
    }
}

/// Serial consumer of one queue (prefetch 1)
pub struct MemoryConsumer {
    broker: MemoryBroker,
    topology: QueueTopology,
    reject_malformed: bool,
    metrics: Option<Arc<Metrics>>,
    span: Span,
}

impl MemoryConsumer {
    pub fn new(broker: MemoryBroker, topology: QueueTopology, reject_malformed: bool) -> Self {
        broker.declare(&topology);
        let span = tracing::info_span!("consumer", queue = %topology.queue);
        Self {
            broker,
            topology,
            reject_malformed,
            metrics: None,
            span,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn consume(
        self,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> Result<(), ConsumerError> {
        let span = self.span.clone();
        async move {
            let queue = self.topology.queue.as_str();
            info!("📥 Consumer started");

            while let Some(message) = self.broker.next_delivery(queue, &shutdown).await? {
                let disposition = process_delivery(
                    &handler,
                    queue,
                    &message.payload,
                    message.redelivered,
                    self.reject_malformed,
                    self.metrics.as_deref(),
                    &shutdown,
                )
                .await;

                self.broker.settle(queue, message, disposition);
            }

            info!("🛑 Consumer stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
