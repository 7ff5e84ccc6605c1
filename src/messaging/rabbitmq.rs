use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

use super::topology::{
    QueueTopology, DEAD_LETTER_EXCHANGE_ARG, DEAD_LETTER_ROUTING_KEY_ARG, MESSAGE_TTL_ARG,
};
use super::{process_delivery, ConsumerError, Disposition, EventPublisher, MessageHandler, PublishError};
use crate::metrics::Metrics;

// ============================================================================
// RabbitMQ Publisher & Consumer (lapin)
// ============================================================================
//
// Publisher: durable fanout exchange, publisher confirms, persistent
// messages (delivery_mode = 2), event type in the AMQP `type` property.
//
// Consumer: declares its queue with DLX + TTL, the DLX and the DLQ, binds
// the queue to the exchange, sets prefetch and settles every delivery
// manually.
//
// ============================================================================

const PERSISTENT: u8 = 2;
const CONTENT_TYPE_JSON: &str = "application/json";

async fn declare_fanout(channel: &Channel, exchange: &str) -> Result<(), lapin::Error> {
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
}

struct Link {
    connection: Connection,
    channel: Channel,
}

/// Publisher that reconnects lazily after a transport failure
pub struct RabbitPublisher {
    url: String,
    exchange: String,
    link: Mutex<Option<Link>>,
}

impl RabbitPublisher {
    pub async fn connect(url: impl Into<String>, exchange: impl Into<String>) -> Result<Self, PublishError> {
        let publisher = Self {
            url: url.into(),
            exchange: exchange.into(),
            link: Mutex::new(None),
        };

        let link = publisher.open_link().await?;
        *publisher.link.lock().await = Some(link);

        info!(exchange = %publisher.exchange, "✅ RabbitMQ publisher connected");
        Ok(publisher)
    }

    async fn open_link(&self) -> Result<Link, PublishError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel.confirm_select(ConfirmSelectOptions::default()).await?;
        declare_fanout(&channel, &self.exchange).await?;

        Ok(Link { connection, channel })
    }

    pub async fn close(&self) {
        if let Some(link) = self.link.lock().await.take() {
            let _ = link.channel.close(200, "publisher closing").await;
            let _ = link.connection.close(200, "publisher closing").await;
        }
    }
}

#[async_trait]
impl EventPublisher for RabbitPublisher {
    async fn deliver(&self, event_type: &str, payload: &[u8]) -> Result<(), PublishError> {
        let mut guard = self.link.lock().await;

        let channel = match guard.as_ref() {
            Some(link) if link.channel.status().connected() => link.channel.clone(),
            _ => {
                warn!(exchange = %self.exchange, "RabbitMQ link down, reconnecting");
                let link = self.open_link().await?;
                let channel = link.channel.clone();
                *guard = Some(link);
                channel
            }
        };

        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type(CONTENT_TYPE_JSON.into())
            .with_kind(event_type.into());

        let published = async {
            channel
                .basic_publish(&self.exchange, "", BasicPublishOptions::default(), payload, properties)
                .await?
                .await
        }
        .await;

        match published {
            Ok(confirmation) if confirmation.is_nack() => {
                Err(PublishError::NotConfirmed(event_type.to_string()))
            }
            Ok(_) => {
                debug!(exchange = %self.exchange, event_type, "Published to RabbitMQ");
                Ok(())
            }
            Err(e) => {
                // Force a fresh connection on the next call
                *guard = None;
                Err(e.into())
            }
        }
    }
}

/// Declare the full topology for one consuming queue
pub async fn declare_topology(channel: &Channel, topology: &QueueTopology) -> Result<(), lapin::Error> {
    declare_fanout(channel, &topology.exchange).await?;

    channel
        .exchange_declare(
            &topology.dead_letter_exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    let durable = QueueDeclareOptions {
        durable: true,
        ..QueueDeclareOptions::default()
    };

    channel
        .queue_declare(&topology.dead_letter_queue, durable, FieldTable::default())
        .await?;
    channel
        .queue_bind(
            &topology.dead_letter_queue,
            &topology.dead_letter_exchange,
            topology.dead_letter_routing_key(),
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    let mut arguments = FieldTable::default();
    arguments.insert(
        DEAD_LETTER_EXCHANGE_ARG.into(),
        AMQPValue::LongString(topology.dead_letter_exchange.as_str().into()),
    );
    arguments.insert(
        DEAD_LETTER_ROUTING_KEY_ARG.into(),
        AMQPValue::LongString(topology.dead_letter_routing_key().into()),
    );
    arguments.insert(MESSAGE_TTL_ARG.into(), AMQPValue::LongInt(topology.message_ttl_ms()));

    channel.queue_declare(&topology.queue, durable, arguments).await?;
    channel
        .queue_bind(
            &topology.queue,
            &topology.exchange,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!(
        queue = %topology.queue,
        exchange = %topology.exchange,
        dlq = %topology.dead_letter_queue,
        ttl_ms = topology.message_ttl_ms(),
        "Declared queue topology"
    );

    Ok(())
}

pub struct RabbitConsumer {
    connection: Connection,
    channel: Channel,
    topology: QueueTopology,
    reject_malformed: bool,
    metrics: Option<Arc<Metrics>>,
    span: Span,
}

impl RabbitConsumer {
    pub async fn connect(
        url: &str,
        topology: QueueTopology,
        prefetch_count: u16,
        reject_malformed: bool,
    ) -> Result<Self, ConsumerError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        declare_topology(&channel, &topology).await?;
        channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await?;

        let span = tracing::info_span!("consumer", queue = %topology.queue);

        Ok(Self {
            connection,
            channel,
            topology,
            reject_malformed,
            metrics: None,
            span,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn queue(&self) -> &str {
        &self.topology.queue
    }

    /// Consume until cancelled or the broker closes the stream.
    /// Channel and connection are closed on the way out either way.
    pub async fn consume(
        self,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> Result<(), ConsumerError> {
        let span = self.span.clone();
        async move {
            let result = self.consume_loop(&handler, &shutdown).await;

            let _ = self.channel.close(200, "consumer shutting down").await;
            let _ = self.connection.close(200, "consumer shutting down").await;
            info!("🛑 Consumer stopped");

            result
        }
        .instrument(span)
        .await
    }

    async fn consume_loop(
        &self,
        handler: &Arc<dyn MessageHandler>,
        shutdown: &CancellationToken,
    ) -> Result<(), ConsumerError> {
        let queue = self.topology.queue.as_str();
        let mut deliveries = self
            .channel
            .basic_consume(
                queue,
                &format!("{queue}-consumer"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!("📥 Consumer started");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(ConsumerError::StreamClosed(queue.to_string())),
            };

            log_death_history(queue, &delivery);

            let disposition = process_delivery(
                handler,
                queue,
                &delivery.data,
                delivery.redelivered,
                self.reject_malformed,
                self.metrics.as_deref(),
                shutdown,
            )
            .await;

            let settled = match disposition {
                Disposition::Ack => delivery.ack(BasicAckOptions::default()).await,
                Disposition::Requeue => {
                    delivery
                        .nack(BasicNackOptions {
                            multiple: false,
                            requeue: true,
                        })
                        .await
                }
                Disposition::DeadLetter => {
                    delivery
                        .nack(BasicNackOptions {
                            multiple: false,
                            requeue: false,
                        })
                        .await
                }
            };

            if let Err(e) = settled {
                error!(error = %e, disposition = disposition.as_str(), "Failed to settle delivery");
                return Err(e.into());
            }
        }
    }
}

fn log_death_history(queue: &str, delivery: &Delivery) {
    let deaths = delivery
        .properties
        .headers()
        .as_ref()
        .and_then(|headers| headers.inner().get("x-death"))
        .and_then(|value| match value {
            AMQPValue::FieldArray(array) => Some(array.as_slice().len()),
            _ => None,
        });

    if let Some(deaths) = deaths {
        warn!(queue, deaths, "Delivery carries x-death history");
    }
}
