//! Error types for admission control.
//!
//! Most of these never reach a caller of [`RateLimiter::check_rate_limit`]:
//! backend failures are recovered through the fallback store and anything
//! else is folded into a fail-open [`Decision`] carrying an [`ErrorCode`].
//!
//! [`RateLimiter::check_rate_limit`]: crate::limiter::RateLimiter::check_rate_limit
//! [`Decision`]: crate::decision::Decision

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for admission control operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Main error type for admission control operations.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Distributed backend error.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Key generation failed.
    #[error("Key extraction failed: {0}")]
    KeyExtraction(String),

    /// Connection error (e.g., Redis connection failed).
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Distributed backend errors.
///
/// Every variant triggers the in-process fallback.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Generic backend operation failed.
    #[error("{message}")]
    OperationFailed {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The call did not finish within the configured budget.
    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    /// The backend call panicked.
    #[error("Backend call panicked")]
    Panicked,

    /// The backend is known to be unreachable.
    #[error("Backend unavailable")]
    Unavailable,

    /// The backend answered with something we cannot interpret.
    #[error("Unexpected backend reply: {0}")]
    UnexpectedReply(String),

    /// Connection pool exhausted.
    #[error("Connection pool exhausted")]
    PoolExhausted,
}

impl BackendError {
    /// Create a new operation failed error.
    pub fn operation_failed(message: impl Into<String>, retryable: bool) -> Self {
        Self::OperationFailed {
            message: message.into(),
            retryable,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OperationFailed { retryable, .. } => *retryable,
            Self::Timeout(_) => true,
            Self::PoolExhausted => true,
            _ => false,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration registered under this name.
    #[error("Configuration '{0}' not found")]
    NotFound(String),

    /// Invalid limit configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Missing required configuration.
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// Settings could not be parsed.
    #[error("Failed to parse settings: {0}")]
    Parse(String),
}

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Failed to connect.
    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    /// Connection timeout.
    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    /// Connection closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    Closed,
}

/// Error code attached to a fail-open decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The requested configuration name is not registered.
    ConfigNotFound,
    /// Anything else went wrong while deciding.
    InternalError,
}

impl ErrorCode {
    /// Wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigNotFound => "CONFIG_NOT_FOUND",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RateLimitError {
    /// Decision code this error surfaces as.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Config(ConfigError::NotFound(_)) => ErrorCode::ConfigNotFound,
            _ => ErrorCode::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_retryable() {
        let err = BackendError::operation_failed("test", true);
        assert!(err.is_retryable());

        let err = BackendError::operation_failed("test", false);
        assert!(!err.is_retryable());

        let err = BackendError::Timeout(Duration::from_millis(50));
        assert!(err.is_retryable());

        let err = BackendError::Unavailable;
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = RateLimitError::KeyExtraction("generator panicked".into());
        assert_eq!(err.to_string(), "Key extraction failed: generator panicked");

        let err: RateLimitError = ConfigError::NotFound("NONEXISTENT".into()).into();
        assert!(err.to_string().contains("'NONEXISTENT' not found"));
    }

    #[test]
    fn test_error_codes() {
        let err: RateLimitError = ConfigError::NotFound("x".into()).into();
        assert_eq!(err.code(), ErrorCode::ConfigNotFound);

        let err: RateLimitError = BackendError::Unavailable.into();
        assert_eq!(err.code(), ErrorCode::InternalError);

        assert_eq!(ErrorCode::ConfigNotFound.to_string(), "CONFIG_NOT_FOUND");
        assert_eq!(
            serde_json::to_string(&ErrorCode::InternalError).unwrap(),
            "\"INTERNAL_ERROR\""
        );
    }
}
