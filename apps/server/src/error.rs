//! HTTP error mapping for the API routes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use cassava_core::errors::Error as CoreError;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    /// No connectivity; the caller may retry later.
    #[error("{0}")]
    ServiceUnavailable(String),

    /// Classifier or Supabase failed.
    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "offline"),
            Self::BadGateway(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        if status.is_server_error() {
            tracing::error!("[Api] {} {}", status, self);
        }
        let body = ErrorBody {
            code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::Validation(_) => Self::BadRequest(message),
            CoreError::Auth(_) => Self::Unauthorized(message),
            CoreError::NotFound(_) => Self::NotFound(message),
            CoreError::Connectivity(_) | CoreError::NotInitialized => {
                Self::ServiceUnavailable(message)
            }
            CoreError::Inference(_) | CoreError::RemoteWrite(_) | CoreError::Remote(_) => {
                Self::BadGateway(message)
            }
            CoreError::Database(_) | CoreError::Serialization(_) => Self::Internal(message),
        }
    }
}

impl From<cassava_backend::BackendError> for ApiError {
    fn from(err: cassava_backend::BackendError) -> Self {
        Self::from(CoreError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_statuses() {
        let cases = [
            (CoreError::validation("empty user"), StatusCode::BAD_REQUEST),
            (CoreError::Auth("no session".into()), StatusCode::UNAUTHORIZED),
            (CoreError::NotFound("gone".into()), StatusCode::NOT_FOUND),
            (CoreError::connectivity("offline"), StatusCode::SERVICE_UNAVAILABLE),
            (CoreError::remote_write("insert"), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).parts().0, status);
        }
    }

    #[test]
    fn backend_auth_error_is_unauthorized() {
        let err = ApiError::from(cassava_backend::BackendError::auth("Invalid login credentials"));
        assert!(matches!(err, ApiError::Unauthorized(ref m) if m.contains("Invalid login credentials")));
    }
}
