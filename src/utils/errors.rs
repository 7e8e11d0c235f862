// src/utils/errors.rs
//! Error taxonomy for the mock server
//!
//! Every failure is handled at the boundary of the component that detects
//! it. `status_code` is the single place where an error becomes an HTTP
//! status.

use hyper::StatusCode;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, MockError>;

/// Errors surfaced by the broker, the store and the transports
#[derive(Debug, Error)]
pub enum MockError {
    /// Store read/write failure
    #[error("storage failed: {0}")]
    StorageFailed(String),

    /// Invalid or unloadable configuration
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Malformed inbound payload
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unknown or already-resolved request id, or missing record
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation only allowed on the primary instance
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// No live primary could be determined
    #[error("No primary service available to handle the request.")]
    NoPrimary,

    /// Transport or timeout failure while relaying to the primary
    #[error("Failed to proxy request to primary: {0}")]
    ForwardingFailed(String),

    /// A spawned task failed before producing a result
    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MockError {
    /// HTTP status used when this error reaches a caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            MockError::BadRequest(_) | MockError::Serialization(_) => StatusCode::BAD_REQUEST,
            MockError::NotFound(_) => StatusCode::NOT_FOUND,
            MockError::Forbidden(_) => StatusCode::FORBIDDEN,
            MockError::NoPrimary | MockError::ForwardingFailed(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            MockError::StorageFailed(_)
            | MockError::ConfigError(_)
            | MockError::Internal(_)
            | MockError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<rusqlite::Error> for MockError {
    fn from(err: rusqlite::Error) -> Self {
        MockError::StorageFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            MockError::BadRequest("empty".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            MockError::NotFound("req".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            MockError::NoPrimary.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            MockError::ForwardingFailed("timeout".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            MockError::StorageFailed("locked".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rusqlite_conversion() {
        let err: MockError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, MockError::StorageFailed(_)));
    }
}
