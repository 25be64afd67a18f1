//! OAuth2 access tokens from a stored refresh token.
//!
//! The credentials JSON is the "authorized user" shape Google's client
//! libraries write: `client_id`, `client_secret`, `refresh_token` and an
//! optional `token_uri`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{check_status, GoogleApiError};

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens are refreshed this long before Google says they expire.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Source of bearer tokens for Google API calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, GoogleApiError>;

    /// Drop any cached token so the next call fetches a fresh one.
    async fn invalidate(&self) {}
}

/// A fixed token. Used by tests and for short-lived manual runs.
pub struct StaticTokenSource(pub String);

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String, GoogleApiError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleCredentials {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl GoogleCredentials {
    /// Parse credentials JSON, tolerating a leading byte-order mark.
    pub fn from_json(raw: &str) -> Result<Self, GoogleApiError> {
        let raw = raw.trim_start_matches('\u{feff}').trim();
        let creds: GoogleCredentials = serde_json::from_str(raw)
            .map_err(|e| GoogleApiError::InvalidCredentials(e.to_string()))?;
        if creds.client_id.trim().is_empty() || creds.refresh_token.trim().is_empty() {
            return Err(GoogleApiError::InvalidCredentials(
                "client_id and refresh_token are required".to_string(),
            ));
        }
        Ok(creds)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Refresh-token grant with an in-process cache.
pub struct OAuthTokenSource {
    http: reqwest::Client,
    credentials: GoogleCredentials,
    cached: Mutex<Option<CachedToken>>,
}

impl OAuthTokenSource {
    pub fn new(http: reqwest::Client, credentials: GoogleCredentials) -> Self {
        Self {
            http,
            credentials,
            cached: Mutex::new(None),
        }
    }

    async fn refresh(&self) -> Result<CachedToken, GoogleApiError> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", self.credentials.client_id.as_str()),
            ("refresh_token", self.credentials.refresh_token.as_str()),
        ];
        if let Some(secret) = self.credentials.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let response = self
            .http
            .post(&self.credentials.token_uri)
            .form(&form)
            .send()
            .await?;
        let response = check_status(response).await.map_err(|e| match e {
            // 400 from the token endpoint means the grant itself is bad.
            GoogleApiError::Api { status: 400, message } => {
                GoogleApiError::InvalidCredentials(message)
            }
            GoogleApiError::Api { status, message } => {
                GoogleApiError::RefreshFailed(format!("{}: {}", status, message))
            }
            other => other,
        })?;

        let body: TokenResponse = response.json().await?;
        let lifetime = body.expires_in.unwrap_or(3600);
        info!(expires_in = lifetime, "Google access token refreshed");
        Ok(CachedToken {
            value: body.access_token,
            expires_at: Utc::now() + Duration::seconds(lifetime - EXPIRY_SKEW_SECS),
        })
    }
}

#[async_trait]
impl TokenSource for OAuthTokenSource {
    async fn access_token(&self) -> Result<String, GoogleApiError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.value.clone());
            }
            debug!("Cached Google access token expired");
        }
        let fresh = self.refresh().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}
