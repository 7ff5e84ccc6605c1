use async_trait::async_trait;
use uuid::Uuid;

use super::entity::TimeRecord;
use super::events::DomainEvent;
use crate::outbox::OutboxError;

// ============================================================================
// Time Record Repository - persistence port for the time clock service
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Outbox(#[from] OutboxError),

    /// Another active record exists for the employee
    #[error("conflicting active time record")]
    Conflict,

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait TimeRecordRepository: Send + Sync {
    /// The open (CHECKED_IN) record of an employee, if any
    async fn find_active(&self, employee_id: &str) -> Result<Option<TimeRecord>, RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TimeRecord>, RepositoryError>;

    /// Upsert the record and append the event to the outbox in one transaction.
    /// Either both are durable or neither is.
    async fn save_with_event(
        &self,
        record: &TimeRecord,
        event: &DomainEvent,
    ) -> Result<(), RepositoryError>;
}
