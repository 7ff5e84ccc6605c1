use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::TimeRecord;
use super::errors::TimeRecordError;

// ============================================================================
// Time Record Events - published through the outbox
// ============================================================================
//
// Wire shape is a flat JSON object tagged by `event_type`:
//
//   {"event_type":"EmployeeCheckedOut","event_id":"…","version":1,
//    "timestamp":"…","employee_id":"E1","hours_worked":8.5,…}
//
// Decoding ignores fields it does not know, so newer producers can add
// optional fields under a bumped `version` without breaking consumers.
//
// ============================================================================

pub const EMPLOYEE_CHECKED_IN: &str = "EmployeeCheckedIn";
pub const EMPLOYEE_CHECKED_OUT: &str = "EmployeeCheckedOut";

/// Schema version written by this producer
pub const SCHEMA_VERSION: u32 = 1;

/// Header shared by every event
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventHeader {
    pub event_id: Uuid,
    pub version: u32,
    pub timestamp: DateTime<Utc>,
}

impl EventHeader {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            version: SCHEMA_VERSION,
            timestamp,
        }
    }
}

/// Employee Checked In - a new time record was opened
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EmployeeCheckedIn {
    #[serde(flatten)]
    pub header: EventHeader,
    pub employee_id: String,
    pub check_in_at: DateTime<Utc>,
    pub record_id: Uuid,
}

/// Employee Checked Out - drives labor cost reporting and the summary email
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EmployeeCheckedOut {
    #[serde(flatten)]
    pub header: EventHeader,
    pub employee_id: String,
    pub check_in_at: DateTime<Utc>,
    pub check_out_at: DateTime<Utc>,
    pub hours_worked: f64,
    pub record_id: Uuid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "event_type")]
pub enum DomainEvent {
    #[serde(rename = "EmployeeCheckedIn")]
    CheckedIn(EmployeeCheckedIn),
    #[serde(rename = "EmployeeCheckedOut")]
    CheckedOut(EmployeeCheckedOut),
}

impl DomainEvent {
    pub const ALL_TYPES: [&'static str; 2] = [EMPLOYEE_CHECKED_IN, EMPLOYEE_CHECKED_OUT];

    pub fn checked_in(record: &TimeRecord, now: DateTime<Utc>) -> Self {
        DomainEvent::CheckedIn(EmployeeCheckedIn {
            header: EventHeader::new(now),
            employee_id: record.employee_id.clone(),
            check_in_at: record.check_in_at,
            record_id: record.id,
        })
    }

    /// Requires a closed record
    pub fn checked_out(record: &TimeRecord, now: DateTime<Utc>) -> Result<Self, TimeRecordError> {
        let check_out_at = record.check_out_at.ok_or(TimeRecordError::AlreadyCheckedOut)?;

        Ok(DomainEvent::CheckedOut(EmployeeCheckedOut {
            header: EventHeader::new(now),
            employee_id: record.employee_id.clone(),
            check_in_at: record.check_in_at,
            check_out_at,
            hours_worked: record.hours_worked,
            record_id: record.id,
        }))
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::CheckedIn(_) => EMPLOYEE_CHECKED_IN,
            DomainEvent::CheckedOut(_) => EMPLOYEE_CHECKED_OUT,
        }
    }

    pub fn header(&self) -> &EventHeader {
        match self {
            DomainEvent::CheckedIn(e) => &e.header,
            DomainEvent::CheckedOut(e) => &e.header,
        }
    }

    /// The time record the event belongs to
    pub fn aggregate_id(&self) -> Uuid {
        match self {
            DomainEvent::CheckedIn(e) => e.record_id,
            DomainEvent::CheckedOut(e) => e.record_id,
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
