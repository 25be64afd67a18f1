//! Route handlers.
//!
//! Each handler validates its input, calls one orchestrator entry point, and
//! turns the outcome into the response its caller acts on.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use meetconfirm_core::{MeetingStatus, TaskKind, UserAction};
use meetconfirm_engine::secrets::CHANNEL_TOKEN;
use meetconfirm_engine::{
    ChangeNotification, NotificationOutcome, OrchestratorError, ResourceState, UserActionOutcome,
};
use meetconfirm_google::WatchChannel;

use crate::error::ApiError;
use crate::pages;
use crate::state::AppState;

pub const RESOURCE_STATE_HEADER: &str = "x-goog-resource-state";
pub const CHANNEL_ID_HEADER: &str = "x-goog-channel-id";
pub const CHANNEL_TOKEN_HEADER: &str = "x-goog-channel-token";
pub const MESSAGE_NUMBER_HEADER: &str = "x-goog-message-number";

// =============================================================================
// Service info
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InfoResponse {
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// GET /api/v1/healthz
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// GET /
pub async fn root(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        service: "meetconfirm".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

// =============================================================================
// Calendar webhook
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status: String,
    #[serde(default)]
    pub detected: usize,
    #[serde(default)]
    pub created: usize,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse_notification(headers: &HeaderMap) -> Result<ChangeNotification, ApiError> {
    let state = header_str(headers, RESOURCE_STATE_HEADER).ok_or_else(|| {
        ApiError::BadRequest(format!("Missing {} header", RESOURCE_STATE_HEADER))
    })?;
    let mut notification = ChangeNotification::new(ResourceState::parse(state));
    notification.channel_id = header_str(headers, CHANNEL_ID_HEADER).map(str::to_string);
    notification.channel_token = header_str(headers, CHANNEL_TOKEN_HEADER).map(str::to_string);
    notification.message_number =
        header_str(headers, MESSAGE_NUMBER_HEADER).and_then(|v| v.parse().ok());
    Ok(notification)
}

/// POST /api/v1/webhook/calendar
pub async fn webhook_calendar(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<WebhookResponse>, ApiError> {
    let notification = parse_notification(&headers).inspect_err(|e| {
        warn!(error = ?e, "Malformed calendar notification");
    })?;

    let outcome = state
        .orchestrator
        .on_calendar_notification(&notification)
        .await?;
    let response = match outcome {
        NotificationOutcome::SyncAcknowledged => WebhookResponse {
            status: "sync_received".to_string(),
            detected: 0,
            created: 0,
        },
        NotificationOutcome::Processed { detected, created } => WebhookResponse {
            status: "changes_processed".to_string(),
            detected,
            created,
        },
    };
    Ok(Json(response))
}

// =============================================================================
// Scheduler callbacks
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_status: Option<MeetingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn run_task(
    state: &AppState,
    kind: TaskKind,
    meeting_id: &str,
) -> Result<Json<TaskResponse>, ApiError> {
    match state.orchestrator.run_task(kind, meeting_id).await {
        Ok(outcome) => {
            info!(
                meeting_id,
                kind = kind.slug(),
                outcome = outcome.label(),
                "Task callback handled"
            );
            Ok(Json(TaskResponse {
                status: outcome.label().to_string(),
                meeting_status: outcome.status(),
                error: None,
            }))
        }
        Err(e) if e.is_retryable() => Err(e.into()),
        // Acknowledged so the queue stops redelivering a request that cannot succeed.
        Err(e) => {
            error!(meeting_id, kind = kind.slug(), error = %e, "Task callback failed permanently");
            Ok(Json(TaskResponse {
                status: "failed".to_string(),
                meeting_status: None,
                error: Some(e.to_string()),
            }))
        }
    }
}

/// POST /api/v1/tasks/send-confirm/{meeting_id}
pub async fn task_send_confirm(
    State(state): State<AppState>,
    Path(meeting_id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    run_task(&state, TaskKind::SendConfirmation, &meeting_id).await
}

/// POST /api/v1/tasks/enforce/{meeting_id}
pub async fn task_enforce(
    State(state): State<AppState>,
    Path(meeting_id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    run_task(&state, TaskKind::EnforceDeadline, &meeting_id).await
}

// =============================================================================
// Attendee links
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LinkParams {
    pub meeting_id: Option<String>,
    pub token: Option<String>,
}

async fn user_link(state: &AppState, action: UserAction, params: LinkParams) -> Response {
    let (Some(meeting_id), Some(token)) = (params.meeting_id, params.token) else {
        warn!(%action, "Link without meeting id or token");
        return pages::invalid_link().into_response();
    };

    let result = state
        .orchestrator
        .on_user_action(&meeting_id, action, &token)
        .await;
    let page: (StatusCode, Html<String>) = match result {
        Ok(UserActionOutcome::Applied(record)) => pages::applied(action, &record.title),
        Ok(UserActionOutcome::AlreadyProcessed(record)) => {
            pages::already_processed(record.status, &record.title)
        }
        Ok(UserActionOutcome::NotFound) => pages::not_found(),
        Err(OrchestratorError::InvalidToken(_)) | Err(OrchestratorError::MalformedInput(_)) => {
            pages::invalid_link()
        }
        Err(e) if e.is_retryable() => {
            warn!(meeting_id = %meeting_id, %action, error = %e, "Link action failed; user asked to retry");
            pages::try_later()
        }
        Err(e) => {
            error!(meeting_id = %meeting_id, %action, error = %e, "Link action failed");
            pages::error()
        }
    };
    page.into_response()
}

/// GET /api/v1/confirm
pub async fn confirm(State(state): State<AppState>, Query(params): Query<LinkParams>) -> Response {
    user_link(&state, UserAction::Confirm, params).await
}

/// GET /api/v1/cancel
pub async fn cancel(State(state): State<AppState>, Query(params): Query<LinkParams>) -> Response {
    user_link(&state, UserAction::Cancel, params).await
}

// =============================================================================
// Admin
// =============================================================================

#[derive(Debug, Serialize)]
pub struct WatchResponse {
    pub status: String,
    pub webhook_url: String,
    pub channel: WatchChannel,
}

/// POST /api/v1/setup-calendar-watch
pub async fn setup_calendar_watch(
    State(state): State<AppState>,
) -> Result<Json<WatchResponse>, ApiError> {
    let watch = state
        .calendar_watch
        .clone()
        .ok_or_else(|| ApiError::BadRequest("No calendar integration configured".to_string()))?;
    let channel_token = state
        .secrets
        .get_optional(CHANNEL_TOKEN)
        .await
        .map_err(|e| {
            error!(error = %e, "Channel token unavailable");
            if e.is_transient() {
                ApiError::ServiceUnavailable(e.to_string())
            } else {
                ApiError::Internal(e.to_string())
            }
        })?;

    let webhook_url = state.webhook_url();
    let channel = watch
        .watch(&webhook_url, channel_token.as_deref(), state.watch_ttl)
        .await
        .map_err(|e| {
            error!(error = %e, "Calendar watch setup failed");
            if e.is_retryable() {
                ApiError::ServiceUnavailable(e.to_string())
            } else {
                ApiError::Internal(e.to_string())
            }
        })?;

    Ok(Json(WatchResponse {
        status: "watching".to_string(),
        webhook_url,
        channel,
    }))
}

// =============================================================================
// Onboarding
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct OnboardingResponse {
    pub status: String,
    pub message: String,
    pub recipient: String,
    pub event_id: String,
}

/// POST /api/v1/onboarding/run-test
pub async fn run_onboarding_test(
    State(state): State<AppState>,
) -> Result<Json<OnboardingResponse>, ApiError> {
    let run = state
        .orchestrator
        .run_onboarding_test()
        .await
        .inspect_err(|e| error!(error = %e, "Onboarding test failed"))?;

    Ok(Json(OnboardingResponse {
        status: "success".to_string(),
        message: "Onboarding test initiated.".to_string(),
        recipient: run.recipient,
        event_id: run.event.id,
    }))
}
