//! Error types for the Supabase backend crate.

use cassava_core::errors::Error;
use thiserror::Error;

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur while talking to Supabase.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from GoTrue, PostgREST or Storage
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid request (missing required data, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing session, expired refresh token or ownership mismatch
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Local image could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    fn is_transport(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_connect() || e.is_timeout() || e.is_request())
    }

    /// 4xx responses that resending the same request cannot fix.
    fn is_rejected_request(&self) -> bool {
        matches!(
            self,
            Self::Api { status, .. }
                if (400..500).contains(status)
                    && !matches!(*status, 401 | 403 | 404 | 408 | 409 | 423 | 425 | 429)
        )
    }

    /// Maps a failed read into the core taxonomy.
    pub fn into_read_error(self) -> Error {
        match self {
            err if err.is_transport() => Error::connectivity(err.to_string()),
            Self::Auth(message) => Error::Auth(message),
            Self::Api { status, message } if matches!(status, 401 | 403) => Error::Auth(message),
            Self::Api { status: 404, message } => Error::NotFound(message),
            Self::InvalidRequest(message) => Error::validation(message),
            other => Error::Remote(other.to_string()),
        }
    }
}

/// Writes are the common case; reads go through [`BackendError::into_read_error`].
impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        match err {
            err if err.is_transport() => Error::connectivity(err.to_string()),
            BackendError::Auth(message) => Error::Auth(message),
            BackendError::Api { status, message } if matches!(status, 401 | 403) => {
                Error::Auth(message)
            }
            BackendError::Api {
                status: 404,
                message,
            } => Error::NotFound(message),
            BackendError::InvalidRequest(message) => Error::validation(message),
            err @ BackendError::Io(_) => Error::validation(err.to_string()),
            err if err.is_rejected_request() => Error::validation(err.to_string()),
            other => Error::remote_write(other.to_string()),
        }
    }
}
