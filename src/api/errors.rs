use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

use crate::domain::time_record::{CheckInError, TimeRecordError};

// ============================================================================
// API Errors - maps service rejections onto HTTP status codes
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("employee_id must be 3-50 letters or digits: {0}")]
    InvalidEmployeeId(String),

    #[error(transparent)]
    CheckIn(#[from] CheckInError),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidBody(_) => "InvalidRequest",
            ApiError::InvalidEmployeeId(_) => "InvalidEmployeeId",
            ApiError::CheckIn(CheckInError::Rule(TimeRecordError::AlreadyCheckedOut)) => "AlreadyCheckedOut",
            ApiError::CheckIn(CheckInError::Rule(_)) => "InvalidEmployeeId",
            ApiError::CheckIn(CheckInError::DuplicateRequest { .. }) => "DuplicateRequest",
            ApiError::CheckIn(CheckInError::AlreadyCheckedIn) => "AlreadyCheckedIn",
            ApiError::CheckIn(CheckInError::NoActiveCheckIn) => "NoActiveCheckIn",
            ApiError::CheckIn(CheckInError::Repository(_)) => "StorageError",
        }
    }
}

impl From<TimeRecordError> for ApiError {
    fn from(err: TimeRecordError) -> Self {
        ApiError::CheckIn(CheckInError::Rule(err))
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidBody(_) | ApiError::InvalidEmployeeId(_) => StatusCode::BAD_REQUEST,
            ApiError::CheckIn(err) => match err {
                CheckInError::Rule(TimeRecordError::AlreadyCheckedOut) => StatusCode::CONFLICT,
                CheckInError::Rule(_) => StatusCode::BAD_REQUEST,
                CheckInError::DuplicateRequest { .. } => StatusCode::TOO_MANY_REQUESTS,
                CheckInError::AlreadyCheckedIn => StatusCode::CONFLICT,
                CheckInError::NoActiveCheckIn => StatusCode::NOT_FOUND,
                CheckInError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Storage details stay in the logs
        let message = match self {
            ApiError::CheckIn(CheckInError::Repository(_)) => "failed to record check-in".to_string(),
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "success": false,
            "error": self.kind(),
            "message": message
        }))
    }
}
