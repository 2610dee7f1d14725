//! Error taxonomy shared by the orchestrator and its collaborators.

use thiserror::Error;

/// Result type alias used across the core crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for analysis, persistence and sync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No network path to the remote services.
    #[error("No network connectivity: {0}")]
    Connectivity(String),

    /// The classifier failed or returned something unusable.
    #[error("Inference failed: {0}")]
    Inference(#[from] InferenceError),

    /// Upload or remote insert/delete failed despite connectivity.
    #[error("Remote write failed: {0}")]
    RemoteWrite(String),

    /// Remote read failed.
    #[error("Remote request failed: {0}")]
    Remote(String),

    /// Local store unavailable or corrupt.
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    /// Authentication or ownership failure, carries the backend's message.
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Hybrid analysis service is not initialized")]
    NotInitialized,

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity(message.into())
    }

    pub fn remote_write(message: impl Into<String>) -> Self {
        Self::RemoteWrite(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Local persistence failures.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("Failed to create connection pool: {0}")]
    PoolCreationFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}

/// Classifier failure modes.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InferenceError {
    #[error("classifier unreachable: {0}")]
    Network(String),

    #[error("classifier timed out")]
    Timeout,

    #[error("classifier returned HTTP {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("malformed classifier response: {0}")]
    Malformed(String),

    #[error("model is not ready")]
    ModelNotReady,

    #[error("could not read image '{0}'")]
    ImageUnreadable(String),
}

impl InferenceError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_inference_error_keeps_status_and_detail() {
        let err = InferenceError::Http {
            status: 422,
            detail: "file missing".to_string(),
        };
        assert_eq!(err.to_string(), "classifier returned HTTP 422: file missing");
    }
}
