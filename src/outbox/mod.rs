use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::time_record::DomainEvent;

pub mod memory;
pub mod postgres;
pub mod relay;

pub use memory::{MemoryDatabase, MemoryOutboxStore, MemoryTimeRecordRepository};
pub use postgres::{PgOutboxStore, PgTimeRecordRepository};
pub use relay::{OutboxRelay, RelayConfig, RelayStats};

// ============================================================================
// Transactional Outbox
// ============================================================================
//
// Rows are appended inside the same transaction as the time record change
// and picked up later by the relay:
//
//   claim_batch ──► publish each row ──► mark_published / record_failure
//        │                                          │
//        └────────── release (commit) ◄─────────────┘
//
// A claim holds row locks until it is released or dropped. Dropping a claim
// without releasing it discards its updates and leaves the rows eligible for
// the next claim, which is what a crash between claim and commit looks like.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("outbox database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("outbox storage unavailable: {0}")]
    Unavailable(String),

    #[error("event {0} is not part of this claim")]
    NotClaimed(Uuid),
}

/// One row of `outbox_events`
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    pub aggregate_id: Uuid,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
}

/// A row about to be appended. The row id is the event id, so one logical
/// event maps to exactly one row.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    pub aggregate_id: Uuid,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl NewOutboxEvent {
    pub fn from_event(event: &DomainEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: event.header().event_id,
            event_type: event.event_type().to_string(),
            aggregate_id: event.aggregate_id(),
            payload: event.to_payload()?,
            created_at: event.header().timestamp,
        })
    }

    pub fn into_row(self) -> OutboxEvent {
        OutboxEvent {
            id: self.id,
            event_type: self.event_type,
            aggregate_id: self.aggregate_id,
            payload: self.payload,
            created_at: self.created_at,
            published: false,
            published_at: None,
            retry_count: 0,
            last_error: None,
        }
    }
}

/// Source of claimable outbox rows
#[async_trait]
pub trait OutboxStore: Send + Sync + 'static {
    type Claim: OutboxClaim;

    /// Lock up to `limit` unpublished rows of `event_type`, oldest first.
    /// Rows locked by another claim are skipped, never waited on.
    async fn claim_batch(&self, event_type: &str, limit: usize) -> Result<Self::Claim, OutboxError>;
}

/// Exclusive hold on a batch of rows
#[async_trait]
pub trait OutboxClaim: Send {
    fn events(&self) -> &[OutboxEvent];

    /// Flip `published` to true. Never reverts.
    async fn mark_published(&mut self, id: Uuid) -> Result<(), OutboxError>;

    /// Bump `retry_count` and store the error. The row stays eligible.
    async fn record_failure(&mut self, id: Uuid, error: &str) -> Result<(), OutboxError>;

    /// Make the updates durable and give the rows back
    async fn release(self) -> Result<(), OutboxError>;
}
