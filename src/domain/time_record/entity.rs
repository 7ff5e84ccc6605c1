use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::TimeRecordError;
use super::value_objects::{EmployeeId, TimeRecordStatus};

// ============================================================================
// Time Record - one check-in/check-out cycle of an employee
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRecord {
    pub id: Uuid,
    pub employee_id: String,
    pub check_in_at: DateTime<Utc>,
    pub check_out_at: Option<DateTime<Utc>>,
    pub status: TimeRecordStatus,
    pub hours_worked: f64,
}

impl TimeRecord {
    /// Open a new record for an employee
    pub fn check_in(employee_id: &EmployeeId, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            employee_id: employee_id.as_str().to_string(),
            check_in_at: now,
            check_out_at: None,
            status: TimeRecordStatus::CheckedIn,
            hours_worked: 0.0,
        }
    }

    /// Close the record and compute hours worked
    pub fn check_out(&mut self, now: DateTime<Utc>) -> Result<(), TimeRecordError> {
        if self.status == TimeRecordStatus::CheckedOut {
            return Err(TimeRecordError::AlreadyCheckedOut);
        }

        self.check_out_at = Some(now);
        self.status = TimeRecordStatus::CheckedOut;
        self.hours_worked = (now - self.check_in_at).num_milliseconds().max(0) as f64 / 3_600_000.0;

        Ok(())
    }

    pub fn is_checked_in(&self) -> bool {
        self.status == TimeRecordStatus::CheckedIn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn employee() -> EmployeeId {
        EmployeeId::parse("E1000").unwrap()
    }

    #[test]
    fn test_check_in_opens_record() {
        let now = Utc::now();
        let record = TimeRecord::check_in(&employee(), now);

        assert!(record.is_checked_in());
        assert_eq!(record.employee_id, "E1000");
        assert_eq!(record.check_in_at, now);
        assert!(record.check_out_at.is_none());
    }

    #[test]
    fn test_check_out_computes_hours() {
        let start = Utc::now();
        let mut record = TimeRecord::check_in(&employee(), start);

        record.check_out(start + Duration::minutes(510)).unwrap();

        assert_eq!(record.status, TimeRecordStatus::CheckedOut);
        assert_eq!(record.hours_worked, 8.5);
        assert_eq!(record.check_out_at, Some(start + Duration::minutes(510)));
    }

    #[test]
    fn test_second_check_out_rejected() {
        let start = Utc::now();
        let mut record = TimeRecord::check_in(&employee(), start);
        record.check_out(start + Duration::hours(1)).unwrap();

        let err = record.check_out(start + Duration::hours(2)).unwrap_err();
        assert_eq!(err, TimeRecordError::AlreadyCheckedOut);
        assert_eq!(record.hours_worked, 1.0);
    }
}
