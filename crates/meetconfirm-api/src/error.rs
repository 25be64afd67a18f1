//! API error types and JSON error response formatting.
//!
//! Maps orchestrator failures onto status codes the callers act on: `503`
//! tells the webhook sender and the task queue to redeliver, anything else
//! tells them to stop.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use meetconfirm_engine::OrchestratorError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "unauthorized").
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 401 Unauthorized - missing or wrong shared token.
    Unauthorized(String),
    /// 403 Forbidden - a signed link that does not verify.
    Forbidden(String),
    NotFound(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
    /// 503 Service Unavailable - a dependency failed; the caller should retry.
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_code, message) = match self {
            ApiError::BadRequest(msg) => ("bad_request", msg),
            ApiError::Unauthorized(msg) => ("unauthorized", msg),
            ApiError::Forbidden(msg) => ("forbidden", msg),
            ApiError::NotFound(msg) => ("not_found", msg),
            ApiError::Internal(msg) => ("internal_error", msg),
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg),
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        if err.is_retryable() {
            warn!(error = %err, "Request failed; caller should retry");
            return ApiError::ServiceUnavailable(err.to_string());
        }
        match err {
            OrchestratorError::MalformedInput(msg) => ApiError::BadRequest(msg),
            OrchestratorError::UntrustedNotification => {
                ApiError::Unauthorized("Invalid channel token".to_string())
            }
            OrchestratorError::InvalidToken(_) => ApiError::Forbidden("Invalid link".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meetconfirm_engine::{CollaboratorError, TokenError};

    #[test]
    fn test_orchestrator_error_mapping() {
        let cases = [
            (
                OrchestratorError::Collaborator(CollaboratorError::unavailable("email", "down")),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                OrchestratorError::UntrustedNotification,
                StatusCode::UNAUTHORIZED,
            ),
            (
                OrchestratorError::InvalidToken(TokenError::BadSignature),
                StatusCode::FORBIDDEN,
            ),
            (
                OrchestratorError::MalformedInput("no attendee".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                OrchestratorError::Collaborator(CollaboratorError::rejected("email", "bad")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }
}
