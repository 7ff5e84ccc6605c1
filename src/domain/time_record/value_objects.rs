use serde::{Deserialize, Serialize};

use super::errors::TimeRecordError;

// ============================================================================
// Time Record Value Objects
// ============================================================================

/// Badge identifier of an employee. Only emptiness is a domain rule; the
/// HTTP boundary enforces the badge format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmployeeId(String);

impl EmployeeId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, TimeRecordError> {
        let raw = raw.into();
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(TimeRecordError::EmptyEmployeeId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeRecordStatus {
    CheckedIn,
    CheckedOut,
}

impl TimeRecordStatus {
    /// Column representation in `time_records.status`
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRecordStatus::CheckedIn => "CHECKED_IN",
            TimeRecordStatus::CheckedOut => "CHECKED_OUT",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "CHECKED_IN" => Some(TimeRecordStatus::CheckedIn),
            "CHECKED_OUT" => Some(TimeRecordStatus::CheckedOut),
            _ => None,
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
