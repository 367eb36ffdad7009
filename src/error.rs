//! Error taxonomy for the scribe state layer
//!
//! Every failure coming out of the API client is mapped onto one
//! [`ApplicationError`] variant so callers see the same `{name, message,
//! retryable}` shape no matter where it originated. Precondition violations
//! raised by the orchestrators are reported separately as
//! [`InvalidOperationError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single field-level validation failure reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Errors surfaced by the API client and carried in tracking state
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum ApplicationError {
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Bad response: {0}")]
    BadResponse(String),

    #[error("Request rejected: {0}")]
    RequestRejected(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Validation failed: {}", format_field_errors(.0))]
    Validation(Vec<FieldError>),

    #[error("Server unavailable: {0}")]
    ServerUnavailable(String),

    #[error("Server timed out: {0}")]
    ServerTimedOut(String),

    #[error("Request aborted: {0}")]
    RequestAborted(String),
}

fn format_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Uniform view of an error for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    pub retryable: bool,
}

impl ApplicationError {
    /// Human-readable error class, stable across messages
    pub fn name(&self) -> &'static str {
        match self {
            ApplicationError::Unexpected(_) => "Unexpected Error",
            ApplicationError::Configuration(_) => "Configuration Error",
            ApplicationError::BadRequest(_) => "Bad Request",
            ApplicationError::BadResponse(_) => "Bad Response",
            ApplicationError::RequestRejected(_) => "Request Rejected",
            ApplicationError::ServerError(_) => "Server Error",
            ApplicationError::Validation(_) => "Validation Error",
            ApplicationError::ServerUnavailable(_) => "Server Unavailable",
            ApplicationError::ServerTimedOut(_) => "Server Timed Out",
            ApplicationError::RequestAborted(_) => "Request Aborted",
        }
    }

    /// Message without the class prefix
    pub fn message(&self) -> String {
        match self {
            ApplicationError::Unexpected(m)
            | ApplicationError::Configuration(m)
            | ApplicationError::BadRequest(m)
            | ApplicationError::BadResponse(m)
            | ApplicationError::RequestRejected(m)
            | ApplicationError::ServerError(m)
            | ApplicationError::ServerUnavailable(m)
            | ApplicationError::ServerTimedOut(m)
            | ApplicationError::RequestAborted(m) => m.clone(),
            ApplicationError::Validation(errors) => format_field_errors(errors),
        }
    }

    /// Whether re-issuing the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApplicationError::ServerError(_)
                | ApplicationError::ServerUnavailable(_)
                | ApplicationError::ServerTimedOut(_)
                | ApplicationError::Unexpected(_)
        )
    }

    /// Cancellation is not a fault and never reaches visible error state
    pub fn is_abort(&self) -> bool {
        matches!(self, ApplicationError::RequestAborted(_))
    }

    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            name: self.name().to_string(),
            message: self.message(),
            retryable: self.is_retryable(),
        }
    }
}

impl From<reqwest::Error> for ApplicationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApplicationError::ServerTimedOut(err.to_string())
        } else if err.is_connect() {
            ApplicationError::ServerUnavailable(err.to_string())
        } else if err.is_decode() {
            ApplicationError::BadResponse(err.to_string())
        } else if err.is_builder() {
            ApplicationError::Configuration(err.to_string())
        } else {
            ApplicationError::Unexpected(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApplicationError {
    fn from(err: serde_json::Error) -> Self {
        ApplicationError::BadResponse(err.to_string())
    }
}

/// Raised when a caller invokes a mutator whose precondition does not hold
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid operation ({precondition}): {message}")]
pub struct InvalidOperationError {
    /// Name of the failed precondition, e.g. `can_save`
    pub precondition: &'static str,
    pub message: String,
}

impl InvalidOperationError {
    pub fn new(precondition: &'static str, message: impl Into<String>) -> Self {
        Self {
            precondition,
            message: message.into(),
        }
    }
}

/// Result error of orchestrator operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error(transparent)]
    InvalidOperation(#[from] InvalidOperationError),

    #[error(transparent)]
    Application(#[from] ApplicationError),
}

impl StateError {
    pub fn as_application(&self) -> Option<&ApplicationError> {
        match self {
            StateError::Application(e) => Some(e),
            StateError::InvalidOperation(_) => None,
        }
    }

    pub fn is_invalid_operation(&self) -> bool {
        matches!(self, StateError::InvalidOperation(_))
    }
}
