//! Shared-token authentication for scheduler callbacks and admin routes.
//!
//! The expected token is the `task-token` secret, read per request. When it is
//! not configured the routes are open; hosted deployments then rely on the
//! platform's OIDC check in front of the service.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::Rng;
use tracing::warn;

use meetconfirm_engine::secrets::TASK_TOKEN;
use meetconfirm_google::TASK_TOKEN_HEADER;

use crate::error::ApiError;
use crate::state::AppState;

/// Generate a random 64-character hex secret.
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Tokens presented in the task token header and as `Authorization: Bearer <t>`.
///
/// Cloud Tasks puts its OIDC token in `Authorization`, so the task token
/// header is listed first.
fn presented_tokens(headers: &HeaderMap) -> Vec<&str> {
    let from_header = headers
        .get(TASK_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);
    let from_bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    from_header.into_iter().chain(from_bearer).collect()
}

/// Middleware that validates the task token.
///
/// The request passes when any presented value matches.
pub async fn require_task_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let expected = match state.secrets.get_optional(TASK_TOKEN).await {
        Ok(Some(token)) => token,
        Ok(None) => return next.run(req).await,
        Err(e) => {
            warn!(error = %e, "Task token unavailable");
            return ApiError::ServiceUnavailable("Secret store unavailable".to_string())
                .into_response();
        }
    };

    let presented = presented_tokens(req.headers());
    if presented.is_empty() {
        return ApiError::Unauthorized("Missing task token".to_string()).into_response();
    }
    let matched = presented
        .iter()
        .any(|token| constant_time_eq(token.as_bytes(), expected.as_bytes()));
    if matched {
        next.run(req).await
    } else {
        ApiError::Unauthorized("Invalid task token".to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_generate_token_is_hex() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn test_presented_token_sources() {
        let mut headers = HeaderMap::new();
        assert!(presented_tokens(&headers).is_empty());

        headers.insert(TASK_TOKEN_HEADER, HeaderValue::from_static("from-header"));
        assert_eq!(presented_tokens(&headers), vec!["from-header"]);

        headers.insert("authorization", HeaderValue::from_static("Bearer from-bearer"));
        assert_eq!(presented_tokens(&headers), vec!["from-header", "from-bearer"]);

        headers.remove(TASK_TOKEN_HEADER);
        assert_eq!(presented_tokens(&headers), vec!["from-bearer"]);
    }
}
