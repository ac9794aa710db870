//! Ironic client errors

use thiserror::Error;

/// Errors that can occur when interacting with the Ironic API
#[derive(Debug, Error)]
pub enum IronicError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Ironic API returned an error
    #[error("Ironic API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (bad credentials, missing auth)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Node or endpoint not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Node is locked by another operation, retry later
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid request (e.g., bad state transition)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl IronicError {
    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, IronicError::Http(_) | IronicError::Conflict(_))
    }
}
