use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, info};

use crate::store::StoreError;
use crate::utils::response::error as error_response;

pub type AppResult<T> = Result<T, AppError>;

/// Coarse classification clients and handlers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Internal,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("User '{0}' not found")]
    UserNotFound(String),

    #[error("Event '{0}' not found")]
    EventNotFound(String),

    #[error("Event '{0}' is not open for registration")]
    EventInactive(String),

    #[error("User '{user_id}' is already registered for event '{event_id}'")]
    AlreadyRegistered { event_id: String, user_id: String },

    #[error("Event '{0}' is full")]
    EventFull(String),

    #[error("Waitlist for event '{0}' is full")]
    WaitlistFull(String),

    #[error("User '{user_id}' is not registered for event '{event_id}'")]
    NotRegistered { event_id: String, user_id: String },

    #[error("Event '{0}' already exists")]
    EventExists(String),

    #[error("User '{0}' already exists")]
    UserExists(String),

    #[error(
        "Capacity {capacity} is below the {current_attendees} confirmed attendees of event '{event_id}'"
    )]
    CapacityBelowAttendees {
        event_id: String,
        capacity: u32,
        current_attendees: u32,
    },

    #[error("Store error")]
    StoreError(#[from] StoreError),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::ValidationError(_) => ErrorKind::Validation,
            AppError::UserNotFound(_) | AppError::EventNotFound(_) => ErrorKind::NotFound,
            AppError::EventInactive(_)
            | AppError::AlreadyRegistered { .. }
            | AppError::EventFull(_)
            | AppError::WaitlistFull(_)
            | AppError::NotRegistered { .. }
            | AppError::EventExists(_)
            | AppError::UserExists(_)
            | AppError::CapacityBelowAttendees { .. } => ErrorKind::Conflict,
            AppError::StoreError(_) | AppError::Timeout(_) | AppError::InternalServerError(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotRegistered { .. } => StatusCode::NOT_FOUND,
            AppError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => match self.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::UserNotFound(_) => "USER_NOT_FOUND",
            AppError::EventNotFound(_) => "EVENT_NOT_FOUND",
            AppError::EventInactive(_) => "EVENT_INACTIVE",
            AppError::AlreadyRegistered { .. } => "ALREADY_REGISTERED",
            AppError::EventFull(_) => "EVENT_FULL",
            AppError::WaitlistFull(_) => "WAITLIST_FULL",
            AppError::NotRegistered { .. } => "NOT_REGISTERED",
            AppError::EventExists(_) => "EVENT_EXISTS",
            AppError::UserExists(_) => "USER_EXISTS",
            AppError::CapacityBelowAttendees { .. } => "CAPACITY_BELOW_ATTENDEES",
            AppError::StoreError(_) => "STORE_ERROR",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::StoreError(e) => {
                error!(error = ?e, "Store error");
            }
            AppError::Timeout(msg) | AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            _ => {
                info!(code = self.code(), message = %self, "Request rejected");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level message to the client
        let public_message = match &self {
            AppError::ValidationError(msg) | AppError::InternalServerError(msg) => msg.clone(),
            AppError::StoreError(_) => "A storage error occurred".to_string(),
            other => other.to_string(),
        };

        error_response(code, public_message, None, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_map_to_conflict() {
        let errors = [
            AppError::EventFull("evt".to_string()),
            AppError::WaitlistFull("evt".to_string()),
            AppError::EventInactive("evt".to_string()),
            AppError::AlreadyRegistered {
                event_id: "evt".to_string(),
                user_id: "ada".to_string(),
            },
        ];
        for err in errors {
            assert_eq!(err.kind(), ErrorKind::Conflict);
            assert_eq!(err.status_code(), StatusCode::CONFLICT);
        }
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(AppError::EventFull("e".to_string()).code(), "EVENT_FULL");
        assert_eq!(
            AppError::UserNotFound("u".to_string()).code(),
            "USER_NOT_FOUND"
        );
        assert_eq!(
            AppError::NotRegistered {
                event_id: "e".to_string(),
                user_id: "u".to_string()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_store_errors_are_internal() {
        let err = AppError::from(StoreError::Corrupt("bad status".to_string()));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "STORE_ERROR");
    }

    #[test]
    fn test_timeout_is_service_unavailable() {
        let err = AppError::Timeout("register".to_string());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
