//! Cloud Tasks v2 as the delayed-task service.
//!
//! Each task is an HTTP POST back to this service's callback route, signed
//! with an OIDC token for the invoker service account. The deterministic task
//! name goes into the task resource name, so Cloud Tasks answers a repeat
//! create with `409 ALREADY_EXISTS`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::SecondsFormat;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use meetconfirm_engine::secrets::TASK_TOKEN;
use meetconfirm_engine::{CreateTaskError, DelayedTaskService, SecretStore, TaskRequest};

use crate::auth::TokenSource;
use crate::error::{is_retryable_status, GoogleApiError};

/// Header carrying the shared task token. `Authorization` is taken by the
/// OIDC token Cloud Tasks attaches.
pub const TASK_TOKEN_HEADER: &str = "X-Task-Token";

#[derive(Debug, Clone)]
pub struct CloudTasksSettings {
    pub api_base_url: String,
    pub project_id: String,
    pub location: String,
    pub queue: String,
    /// Public base URL of this service; callback targets hang off it.
    pub service_url: String,
    pub invoker_email: Option<String>,
}

impl CloudTasksSettings {
    pub fn queue_path(&self) -> String {
        format!(
            "projects/{}/locations/{}/queues/{}",
            self.project_id, self.location, self.queue
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskBody {
    task: CloudTask,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CloudTask {
    name: String,
    http_request: HttpRequest,
    schedule_time: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpRequest {
    url: String,
    http_method: &'static str,
    headers: HashMap<String, String>,
    body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    oidc_token: Option<OidcToken>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OidcToken {
    service_account_email: String,
    audience: String,
}

pub struct CloudTasksService {
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    secrets: Arc<dyn SecretStore>,
    settings: CloudTasksSettings,
}

impl CloudTasksService {
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<dyn TokenSource>,
        secrets: Arc<dyn SecretStore>,
        mut settings: CloudTasksSettings,
    ) -> Self {
        settings.api_base_url = settings.api_base_url.trim_end_matches('/').to_string();
        settings.service_url = settings.service_url.trim_end_matches('/').to_string();
        Self {
            http,
            tokens,
            secrets,
            settings,
        }
    }

    /// Callback URL the task will POST to.
    pub fn target_url(&self, request: &TaskRequest) -> String {
        format!(
            "{}/api/v1/tasks/{}/{}",
            self.settings.service_url,
            request.kind.slug(),
            urlencoding::encode(&request.meeting_id)
        )
    }

    async fn build_body(&self, request: &TaskRequest) -> Result<CreateTaskBody, CreateTaskError> {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        let task_token = self
            .secrets
            .get_optional(TASK_TOKEN)
            .await
            .map_err(|e| CreateTaskError::Unavailable(e.to_string()))?;
        if let Some(token) = task_token {
            headers.insert(TASK_TOKEN_HEADER.to_string(), token);
        }

        let payload = json!({ "meeting_id": request.meeting_id, "kind": request.kind });
        Ok(CreateTaskBody {
            task: CloudTask {
                name: format!("{}/tasks/{}", self.settings.queue_path(), request.name),
                http_request: HttpRequest {
                    url: self.target_url(request),
                    http_method: "POST",
                    headers,
                    body: STANDARD.encode(payload.to_string()),
                    oidc_token: self.settings.invoker_email.as_ref().map(|email| OidcToken {
                        service_account_email: email.clone(),
                        audience: self.settings.service_url.clone(),
                    }),
                },
                schedule_time: request.run_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            },
        })
    }
}

fn token_failure(e: GoogleApiError) -> CreateTaskError {
    if e.is_retryable() {
        CreateTaskError::Unavailable(e.to_string())
    } else {
        CreateTaskError::Rejected(e.to_string())
    }
}

#[async_trait]
impl DelayedTaskService for CloudTasksService {
    async fn create_task(&self, request: &TaskRequest) -> Result<(), CreateTaskError> {
        let body = self.build_body(request).await?;
        let access_token = self.tokens.access_token().await.map_err(token_failure)?;
        let url = format!(
            "{}/{}/tasks",
            self.settings.api_base_url,
            self.settings.queue_path()
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CreateTaskError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(task = %request.name, run_at = %request.run_at, "Cloud task created");
            return Ok(());
        }
        if status == StatusCode::CONFLICT {
            return Err(CreateTaskError::AlreadyExists);
        }

        let message = response.text().await.unwrap_or_default();
        warn!(task = %request.name, %status, "Cloud Tasks create failed");
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        let detail = format!("{}: {}", status.as_u16(), message);
        if is_retryable_status(status) {
            Err(CreateTaskError::Unavailable(detail))
        } else {
            Err(CreateTaskError::Rejected(detail))
        }
    }
}
