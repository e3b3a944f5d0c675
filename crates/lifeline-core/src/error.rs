//! Error types for Lifeline.

use thiserror::Error;

/// Result type alias using Lifeline's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Lifeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Malformed input, rejected before any persistence or matching
    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// SOS event not found
    #[error("SOS event not found: {0}")]
    EventNotFound(uuid::Uuid),

    /// Lifecycle move the state machine does not allow
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Authentication failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed to act on the resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Operation exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Notification sink could not deliver
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a field-level validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for the validation-class errors (malformed input and illegal transitions).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. } | Error::InvalidTransition(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Delivery(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_validation() {
        let err = Error::validation("location.coordinates", "longitude out of range");
        assert_eq!(
            err.to_string(),
            "Validation error on location.coordinates: longitude out of range"
        );
    }

    #[test]
    fn test_error_display_event_not_found() {
        let id = Uuid::nil();
        let err = Error::EventNotFound(id);
        assert_eq!(err.to_string(), format!("SOS event not found: {}", id));
    }

    #[test]
    fn test_error_display_invalid_transition() {
        let err = Error::InvalidTransition("resolved -> active".to_string());
        assert_eq!(err.to_string(), "Invalid transition: resolved -> active");
    }

    #[test]
    fn test_error_display_forbidden() {
        let err = Error::Forbidden("not the incident owner".to_string());
        assert_eq!(err.to_string(), "Forbidden: not the incident owner");
    }

    #[test]
    fn test_is_validation() {
        assert!(Error::validation("status", "unknown").is_validation());
        assert!(Error::InvalidTransition("x".into()).is_validation());
        assert!(!Error::NotFound("x".into()).is_validation());
        assert!(!Error::Forbidden("x".into()).is_validation());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
