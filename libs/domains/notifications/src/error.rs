//! Error types for the notifications domain.

use std::time::Duration;
use thiserror::Error;

use crate::models::ContentId;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur while dispatching notifications.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// A provider is missing a required field. The provider is excluded at
    /// startup; the process keeps running with the remaining ones.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network failure or provider rejection. Recorded as a failed delivery
    /// and eligible for the retry sweep.
    #[error("Send failed: {0}")]
    Send(String),

    /// No provider could be built or selected at all.
    #[error("No email providers available: {0}")]
    NoProviders(String),

    /// Content item does not exist.
    #[error("Content not found: {0}")]
    ContentNotFound(ContentId),

    /// Persistence collaborator failed.
    #[error("Repository error: {0}")]
    Repository(String),

    /// An outbound call exceeded its deadline.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The operation was cancelled before it finished.
    #[error("Operation cancelled")]
    Cancelled,
}

impl NotificationError {
    /// Whether a delivery failing with this error may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NotificationError::Send(_)
                | NotificationError::Timeout(_)
                | NotificationError::Repository(_)
        )
    }
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NotificationError::Send(format!("HTTP request timed out: {}", err))
        } else {
            NotificationError::Send(err.to_string())
        }
    }
}

impl From<lettre::transport::smtp::Error> for NotificationError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        NotificationError::Send(format!("SMTP send failed: {}", err))
    }
}

impl From<lettre::error::Error> for NotificationError {
    fn from(err: lettre::error::Error) -> Self {
        NotificationError::Send(format!("Failed to build email message: {}", err))
    }
}

impl From<lettre::address::AddressError> for NotificationError {
    fn from(err: lettre::address::AddressError) -> Self {
        NotificationError::Send(format!("Invalid email address: {}", err))
    }
}

impl From<sea_orm::DbErr> for NotificationError {
    fn from(err: sea_orm::DbErr) -> Self {
        NotificationError::Repository(err.to_string())
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        NotificationError::Send(format!("JSON serialization error: {}", err))
    }
}

impl From<toml::de::Error> for NotificationError {
    fn from(err: toml::de::Error) -> Self {
        NotificationError::Configuration(format!("Invalid providers file: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_timeout_errors_are_retryable() {
        assert!(NotificationError::Send("connection reset".into()).is_retryable());
        assert!(NotificationError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(NotificationError::Repository("deadlock".into()).is_retryable());
    }

    #[test]
    fn test_configuration_errors_are_not_retryable() {
        assert!(!NotificationError::Configuration("missing host".into()).is_retryable());
        assert!(!NotificationError::NoProviders("none enabled".into()).is_retryable());
        assert!(!NotificationError::ContentNotFound(7).is_retryable());
        assert!(!NotificationError::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = NotificationError::ContentNotFound(42);
        assert_eq!(err.to_string(), "Content not found: 42");

        let err = NotificationError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Operation timed out after 30s");
    }
}
