use std::time::Duration;

// ============================================================================
// Queue Topology
// ============================================================================
//
//   {exchange} (fanout) ──► {queue} ──(ttl / reject)──► {queue}-dlx (direct)
//                                                          │ routing key {queue}-dlq
//                                                          ▼
//                                                       {queue}-dlq
//
// ============================================================================

pub const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";
pub const DEAD_LETTER_ROUTING_KEY_ARG: &str = "x-dead-letter-routing-key";
pub const MESSAGE_TTL_ARG: &str = "x-message-ttl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub exchange: String,
    pub queue: String,
    pub dead_letter_exchange: String,
    pub dead_letter_queue: String,
    pub message_ttl: Duration,
}

impl QueueTopology {
    pub fn new(exchange: impl Into<String>, queue: impl Into<String>, message_ttl: Duration) -> Self {
        let queue = queue.into();
        Self {
            exchange: exchange.into(),
            dead_letter_exchange: format!("{queue}-dlx"),
            dead_letter_queue: format!("{queue}-dlq"),
            queue,
            message_ttl,
        }
    }

    /// Routing key used between the DLX and the DLQ
    pub fn dead_letter_routing_key(&self) -> &str {
        &self.dead_letter_queue
    }

    /// `x-message-ttl` in milliseconds, clamped to the AMQP signed 32-bit range
    pub fn message_ttl_ms(&self) -> i32 {
        i32::try_from(self.message_ttl.as_millis()).unwrap_or(i32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_names_derive_from_queue() {
        let topology = QueueTopology::new("checkout-events", "labor-cost-queue", Duration::from_secs(30));

        assert_eq!(topology.dead_letter_exchange, "labor-cost-queue-dlx");
        assert_eq!(topology.dead_letter_queue, "labor-cost-queue-dlq");
        assert_eq!(topology.dead_letter_routing_key(), "labor-cost-queue-dlq");
        assert_eq!(topology.message_ttl_ms(), 30_000);
    }

    #[test]
    fn test_ttl_clamped() {
        let topology = QueueTopology::new("x", "q", Duration::from_secs(u64::MAX / 1000));
        assert_eq!(topology.message_ttl_ms(), i32::MAX);
    }
}
