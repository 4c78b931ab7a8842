//! Error types for ZenChat
//!
//! This module defines the error taxonomy used throughout the crate,
//! using `thiserror` for ergonomic error handling. Every fallible library
//! operation returns [`ZenError`] so callers can match on the outcome kind
//! instead of parsing messages.

use thiserror::Error;

/// Coarse classification of a [`ZenError`]
///
/// This is the typed outcome surfaced to callers of the synchronizer and
/// the model catalog. Several concrete error variants collapse onto the
/// same kind (for example, a failed store write is reported as
/// `ServerError`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Empty text, unknown session id, or other rejected input
    InvalidInput,
    /// A send is already in flight for the session
    Busy,
    /// No credential is available but the remote call requires one
    AuthRequired,
    /// Transport-level failure; considered transient
    NetworkFailure,
    /// Remote returned 429
    RateLimited,
    /// Remote 4xx/5xx other than auth, or a local store failure
    ServerError,
    /// The operation was aborted by the caller or by a deletion
    Cancelled,
    /// Invalid configuration
    Config,
}

/// Main error type for ZenChat operations
#[derive(Error, Debug)]
pub enum ZenError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input rejected before any side effect
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A send is already in flight for this session
    #[error("Session busy: a message is already being sent for session {0}")]
    Busy(String),

    /// No credential available for an operation that needs one
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    /// Transport error (connect, timeout, broken stream)
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// Remote rate limiting (HTTP 429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Remote error status other than auth and rate limiting
    #[error("Server error{}: {message}", status_suffix(.status))]
    ServerError {
        /// HTTP status code, when the error came from the remote
        status: Option<u16>,
        /// Response body or description
        message: String,
    },

    /// Operation aborted by cancel or session deletion
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Local store errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Keyring/credential storage errors
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

impl ZenError {
    /// Classify this error into its outcome kind
    ///
    /// # Examples
    ///
    /// ```
    /// use zenchat::error::{ErrorKind, ZenError};
    ///
    /// let err = ZenError::Storage("disk full".to_string());
    /// assert_eq!(err.kind(), ErrorKind::ServerError);
    /// ```
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Yaml(_) => ErrorKind::Config,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Busy(_) => ErrorKind::Busy,
            Self::AuthRequired(_) => ErrorKind::AuthRequired,
            Self::NetworkFailure(_) => ErrorKind::NetworkFailure,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::ServerError { .. }
            | Self::Storage(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Keyring(_) => ErrorKind::ServerError,
        }
    }

    /// Whether a caller-initiated retry may succeed without changes
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NetworkFailure | ErrorKind::RateLimited
        )
    }

    /// Map a non-success HTTP status and its body to an error
    ///
    /// 401/403 become `AuthRequired`, 429 becomes `RateLimited`, anything
    /// else is a `ServerError` carrying the status.
    ///
    /// # Examples
    ///
    /// ```
    /// use zenchat::error::{ErrorKind, ZenError};
    ///
    /// assert_eq!(ZenError::from_status(401, "bad key").kind(), ErrorKind::AuthRequired);
    /// assert_eq!(ZenError::from_status(429, "slow down").kind(), ErrorKind::RateLimited);
    /// assert_eq!(ZenError::from_status(502, "").kind(), ErrorKind::ServerError);
    /// ```
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => Self::AuthRequired(format!(
                "remote rejected credentials ({}): {}",
                status, body
            )),
            429 => Self::RateLimited(body.to_string()),
            _ => Self::ServerError {
                status: Some(status),
                message: body.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for ZenError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::from_status(status.as_u16(), &err.to_string()),
            None if err.is_decode() => Self::ServerError {
                status: None,
                message: format!("malformed response: {}", err),
            },
            None => Self::NetworkFailure(err.to_string()),
        }
    }
}

/// Result type alias for ZenChat operations
pub type Result<T> = std::result::Result<T, ZenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = ZenError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_busy_error_display() {
        let error = ZenError::Busy("abc".to_string());
        assert!(error.to_string().contains("abc"));
        assert_eq!(error.kind(), ErrorKind::Busy);
    }

    #[test]
    fn test_server_error_display_with_status() {
        let error = ZenError::ServerError {
            status: Some(500),
            message: "boom".to_string(),
        };
        assert_eq!(error.to_string(), "Server error (500): boom");
    }

    #[test]
    fn test_server_error_display_without_status() {
        let error = ZenError::ServerError {
            status: None,
            message: "boom".to_string(),
        };
        assert_eq!(error.to_string(), "Server error: boom");
    }

    #[test]
    fn test_from_status_mapping() {
        assert_eq!(
            ZenError::from_status(401, "x").kind(),
            ErrorKind::AuthRequired
        );
        assert_eq!(
            ZenError::from_status(403, "x").kind(),
            ErrorKind::AuthRequired
        );
        assert_eq!(
            ZenError::from_status(429, "x").kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            ZenError::from_status(404, "x").kind(),
            ErrorKind::ServerError
        );
        assert_eq!(
            ZenError::from_status(503, "x").kind(),
            ErrorKind::ServerError
        );
    }

    #[test]
    fn test_storage_errors_report_as_server_error() {
        let error = ZenError::Storage("database connection failed".to_string());
        assert_eq!(
            error.to_string(),
            "Storage error: database connection failed"
        );
        assert_eq!(error.kind(), ErrorKind::ServerError);
    }

    #[test]
    fn test_transient_classification() {
        assert!(ZenError::NetworkFailure("reset".into()).is_transient());
        assert!(ZenError::RateLimited("429".into()).is_transient());
        assert!(!ZenError::AuthRequired("no key".into()).is_transient());
        assert!(!ZenError::Cancelled("deleted".into()).is_transient());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: ZenError = io_error.into();
        assert!(matches!(error, ZenError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: ZenError = json_error.into();
        assert!(matches!(error, ZenError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: ZenError = yaml_error.into();
        assert_eq!(error.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ZenError>();
    }
}
