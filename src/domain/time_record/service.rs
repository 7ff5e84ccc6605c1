use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::entity::TimeRecord;
use super::errors::CheckInError;
use super::events::DomainEvent;
use super::repository::{RepositoryError, TimeRecordRepository};
use super::value_objects::EmployeeId;

// ============================================================================
// Time Clock Service
// ============================================================================
//
// Orchestrates: Request → TimeRecord → DomainEvent → Repository (+ Outbox)
//
// Business rejections (duplicate, already checked in) are returned to the
// caller synchronously and never reach the outbox.
//
// ============================================================================

/// What a toggle request ended up doing
#[derive(Debug, Clone, PartialEq)]
pub enum ClockAction {
    CheckedIn(TimeRecord),
    CheckedOut(TimeRecord),
}

impl ClockAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClockAction::CheckedIn(_) => "checked_in",
            ClockAction::CheckedOut(_) => "checked_out",
        }
    }

    pub fn record(&self) -> &TimeRecord {
        match self {
            ClockAction::CheckedIn(r) | ClockAction::CheckedOut(r) => r,
        }
    }
}

pub struct TimeClockService {
    repo: Arc<dyn TimeRecordRepository>,
    duplicate_window: Duration,
}

impl TimeClockService {
    pub fn new(repo: Arc<dyn TimeRecordRepository>, duplicate_window: Duration) -> Self {
        Self {
            repo,
            duplicate_window,
        }
    }

    pub async fn check_in(&self, employee_id: &EmployeeId) -> Result<TimeRecord, CheckInError> {
        self.check_in_at(employee_id, Utc::now()).await
    }

    pub async fn check_out(&self, employee_id: &EmployeeId) -> Result<TimeRecord, CheckInError> {
        self.check_out_at(employee_id, Utc::now()).await
    }

    /// Check out when a record is open, otherwise check in
    pub async fn toggle(&self, employee_id: &EmployeeId) -> Result<ClockAction, CheckInError> {
        self.toggle_at(employee_id, Utc::now()).await
    }

    pub async fn check_in_at(
        &self,
        employee_id: &EmployeeId,
        now: DateTime<Utc>,
    ) -> Result<TimeRecord, CheckInError> {
        if self.repo.find_active(employee_id.as_str()).await?.is_some() {
            return Err(CheckInError::AlreadyCheckedIn);
        }

        let record = TimeRecord::check_in(employee_id, now);
        let event = DomainEvent::checked_in(&record, now);

        match self.repo.save_with_event(&record, &event).await {
            Ok(()) => {}
            // Lost a race against a concurrent check-in for the same employee
            Err(RepositoryError::Conflict) => return Err(CheckInError::AlreadyCheckedIn),
            Err(e) => return Err(e.into()),
        }

        info!(
            employee_id = %employee_id,
            record_id = %record.id,
            event_id = %event.header().event_id,
            "Employee checked in"
        );

        Ok(record)
    }

    pub async fn check_out_at(
        &self,
        employee_id: &EmployeeId,
        now: DateTime<Utc>,
    ) -> Result<TimeRecord, CheckInError> {
        let mut record = self
            .repo
            .find_active(employee_id.as_str())
            .await?
            .ok_or(CheckInError::NoActiveCheckIn)?;

        if now - record.check_in_at < self.duplicate_window {
            warn!(
                employee_id = %employee_id,
                record_id = %record.id,
                window_secs = self.duplicate_window.num_seconds(),
                "Rejected duplicate check-out"
            );
            return Err(CheckInError::DuplicateRequest {
                window_secs: self.duplicate_window.num_seconds(),
            });
        }

        record.check_out(now)?;
        let event = DomainEvent::checked_out(&record, now)?;

        self.repo.save_with_event(&record, &event).await?;

        info!(
            employee_id = %employee_id,
            record_id = %record.id,
            event_id = %event.header().event_id,
            hours_worked = record.hours_worked,
            "Employee checked out"
        );

        Ok(record)
    }

    pub async fn toggle_at(
        &self,
        employee_id: &EmployeeId,
        now: DateTime<Utc>,
    ) -> Result<ClockAction, CheckInError> {
        match self.check_out_at(employee_id, now).await {
            Ok(record) => Ok(ClockAction::CheckedOut(record)),
            Err(CheckInError::NoActiveCheckIn) => {
                debug!(employee_id = %employee_id, "No active record, checking in");
                self.check_in_at(employee_id, now)
                    .await
                    .map(ClockAction::CheckedIn)
            }
            Err(e) => Err(e),
        }
    }
}
