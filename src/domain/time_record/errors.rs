// ============================================================================
// Time Record Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimeRecordError {
    #[error("employee_id is required")]
    EmptyEmployeeId,

    #[error("time record is already checked out")]
    AlreadyCheckedOut,
}

/// Errors returned synchronously to the caller of the time clock service
#[derive(Debug, thiserror::Error)]
pub enum CheckInError {
    #[error(transparent)]
    Rule(#[from] TimeRecordError),

    #[error("employee is already checked in")]
    AlreadyCheckedIn,

    #[error("no active check-in found for employee")]
    NoActiveCheckIn,

    #[error("duplicate check-out request (checked in less than {window_secs} seconds ago)")]
    DuplicateRequest { window_secs: i64 },

    #[error("failed to persist time record: {0}")]
    Repository(#[from] super::repository::RepositoryError),
}
