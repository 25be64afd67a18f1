//! Errors from the Google REST clients.

use meetconfirm_engine::CollaboratorError;
use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum GoogleApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl GoogleApiError {
    /// Transport failures, throttling, expired auth and server errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            GoogleApiError::Http(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            GoogleApiError::Api { status, .. } => {
                StatusCode::from_u16(*status).map_or(false, is_retryable_status)
            }
            GoogleApiError::RefreshFailed(_) => true,
            GoogleApiError::InvalidCredentials(_)
            | GoogleApiError::UnexpectedResponse(_)
            | GoogleApiError::Json(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            GoogleApiError::Api { status, .. } => Some(*status),
            GoogleApiError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Classify for the lifecycle engine.
    pub fn into_collaborator(self, service: &'static str) -> CollaboratorError {
        if self.is_retryable() {
            CollaboratorError::unavailable(service, self.to_string())
        } else {
            CollaboratorError::rejected(service, self.to_string())
        }
    }
}

/// 401 is included: the cached access token may have been revoked and the
/// next attempt refreshes it.
pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::UNAUTHORIZED
        || status.is_server_error()
}

/// Turn a non-success response into `GoogleApiError::Api`.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, GoogleApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(GoogleApiError::Api {
        status: status.as_u16(),
        message,
    })
}
