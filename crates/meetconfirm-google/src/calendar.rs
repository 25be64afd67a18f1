//! Google Calendar API v3.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use meetconfirm_core::CalendarEvent;
use meetconfirm_engine::{CalendarProvider, CollaboratorError, EventDraft, TimeWindow};

use crate::auth::TokenSource;
use crate::error::{check_status, GoogleApiError};

const SERVICE: &str = "calendar";

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<RawEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default)]
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    status: Option<String>,
    start: Option<RawDateTime>,
    end: Option<RawDateTime>,
    #[serde(default)]
    attendees: Vec<RawPerson>,
    organizer: Option<RawPerson>,
    creator: Option<RawPerson>,
    #[serde(default)]
    html_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDateTime {
    date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPerson {
    #[serde(default)]
    email: String,
    #[serde(default)]
    resource: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WatchRequest<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    expiration: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertRequest<'a> {
    summary: &'a str,
    description: &'a str,
    start: InsertDateTime,
    end: InsertDateTime,
    attendees: Vec<InsertAttendee<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertDateTime {
    date_time: String,
    time_zone: &'static str,
}

#[derive(Serialize)]
struct InsertAttendee<'a> {
    email: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchResponse {
    id: String,
    resource_id: String,
    #[serde(default)]
    expiration: Option<String>,
}

/// A registered push-notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchChannel {
    pub id: String,
    pub resource_id: String,
    pub expiration: Option<DateTime<Utc>>,
}

// ============================================================================
// Normalization
// ============================================================================

fn parse_time(raw: &Option<RawDateTime>) -> Option<DateTime<Utc>> {
    let value = raw.as_ref()?.date_time.as_deref()?;
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl RawEvent {
    /// First attendee that is not the organizer or creator and not a room.
    fn attendee_email(&self) -> Option<String> {
        let hosts: Vec<String> = [self.organizer.as_ref(), self.creator.as_ref()]
            .into_iter()
            .flatten()
            .map(|p| p.email.to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self.attendees
            .iter()
            .filter(|a| a.resource != Some(true))
            .map(|a| a.email.trim())
            .find(|email| !email.is_empty() && !hosts.contains(&email.to_lowercase()))
            .map(str::to_string)
    }

    /// `None` for events without an id or a timed start and end (all-day events).
    fn normalize(self) -> Option<CalendarEvent> {
        if self.id.is_empty() {
            return None;
        }
        let start = parse_time(&self.start)?;
        let end = parse_time(&self.end)?;
        let attendee_email = self.attendee_email();
        Some(CalendarEvent {
            title: self.summary.unwrap_or_default(),
            start,
            end,
            attendee_email,
            organizer_email: self
                .organizer
                .map(|o| o.email)
                .filter(|e| !e.is_empty()),
            cancelled: self.status.as_deref() == Some("cancelled"),
            html_link: self.html_link,
            id: self.id,
        })
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ============================================================================
// Client
// ============================================================================

pub struct GoogleCalendar {
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    base_url: String,
    calendar_id: String,
    max_results: u32,
}

impl GoogleCalendar {
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<dyn TokenSource>,
        base_url: &str,
        calendar_id: &str,
    ) -> Self {
        Self {
            http,
            tokens,
            base_url: base_url.trim_end_matches('/').to_string(),
            calendar_id: calendar_id.to_string(),
            max_results: 250,
        }
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results.clamp(1, 2500);
        self
    }

    fn events_url(&self) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(&self.calendar_id)
        )
    }

    fn event_url(&self, event_id: &str) -> String {
        format!("{}/{}", self.events_url(), urlencoding::encode(event_id))
    }

    async fn token(&self) -> Result<String, GoogleApiError> {
        self.tokens.access_token().await
    }

    async fn after_failure(&self, error: &GoogleApiError) {
        if error.status() == Some(401) {
            self.tokens.invalidate().await;
        }
    }

    /// Every event starting inside `window`, following pagination.
    pub async fn list_events(&self, window: TimeWindow) -> Result<Vec<CalendarEvent>, GoogleApiError> {
        let time_min = rfc3339(window.start);
        let time_max = rfc3339(window.end);
        let max_results = self.max_results.to_string();
        let token = self.token().await?;

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .http
                .get(self.events_url())
                .bearer_auth(&token)
                .query(&[
                    ("timeMin", time_min.as_str()),
                    ("timeMax", time_max.as_str()),
                    ("singleEvents", "true"),
                    ("orderBy", "startTime"),
                    ("maxResults", max_results.as_str()),
                ]);
            if let Some(ref page) = page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }

            let response = check_status(request.send().await?).await?;
            let body: EventListResponse = response.json().await?;
            let fetched = body.items.len();
            let before = events.len();
            events.extend(body.items.into_iter().filter_map(RawEvent::normalize));
            if events.len() - before < fetched {
                debug!(skipped = fetched - (events.len() - before), "Untimed events skipped");
            }

            match body.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        debug!(count = events.len(), "Calendar events fetched");
        Ok(events)
    }

    pub async fn fetch_event(&self, event_id: &str) -> Result<Option<CalendarEvent>, GoogleApiError> {
        let response = self
            .http
            .get(self.event_url(event_id))
            .bearer_auth(self.token().await?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let raw: RawEvent = check_status(response).await?.json().await?;
        Ok(raw.normalize())
    }

    /// Delete an event. Already-deleted events count as success.
    pub async fn remove_event(&self, event_id: &str) -> Result<(), GoogleApiError> {
        let response = self
            .http
            .delete(self.event_url(event_id))
            .bearer_auth(self.token().await?)
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            warn!(event_id, "Event already deleted");
            return Ok(());
        }
        check_status(response).await?;
        info!(event_id, "Calendar event deleted");
        Ok(())
    }

    pub async fn insert_event(&self, draft: &EventDraft) -> Result<CalendarEvent, GoogleApiError> {
        let body = InsertRequest {
            summary: &draft.title,
            description: &draft.description,
            start: InsertDateTime {
                date_time: rfc3339(draft.start),
                time_zone: "UTC",
            },
            end: InsertDateTime {
                date_time: rfc3339(draft.end),
                time_zone: "UTC",
            },
            attendees: vec![InsertAttendee {
                email: &draft.attendee_email,
            }],
        };
        let response = self
            .http
            .post(self.events_url())
            .bearer_auth(self.token().await?)
            .json(&body)
            .send()
            .await?;
        let raw: RawEvent = check_status(response).await?.json().await?;
        let event = raw.normalize().ok_or_else(|| {
            GoogleApiError::UnexpectedResponse("created event has no id or times".to_string())
        })?;
        info!(event_id = %event.id, "Calendar event created");
        Ok(event)
    }

    /// Register a push channel delivering change notifications to `webhook_url`.
    pub async fn watch(
        &self,
        webhook_url: &str,
        channel_token: Option<&str>,
        ttl: Duration,
    ) -> Result<WatchChannel, GoogleApiError> {
        let channel_id = uuid::Uuid::new_v4().simple().to_string();
        let expiration = (Utc::now() + ttl).timestamp_millis().to_string();
        let body = WatchRequest {
            id: &channel_id,
            kind: "web_hook",
            address: webhook_url,
            token: channel_token,
            expiration,
        };

        let response = self
            .http
            .post(format!("{}/watch", self.events_url()))
            .bearer_auth(self.token().await?)
            .json(&body)
            .send()
            .await?;
        let watch: WatchResponse = check_status(response).await?.json().await?;

        let expiration = watch
            .expiration
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis);
        info!(channel_id = %watch.id, resource_id = %watch.resource_id, ?expiration, "Calendar watch established");
        Ok(WatchChannel {
            id: watch.id,
            resource_id: watch.resource_id,
            expiration,
        })
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendar {
    async fn fetch_events(&self, window: TimeWindow) -> Result<Vec<CalendarEvent>, CollaboratorError> {
        match self.list_events(window).await {
            Ok(events) => Ok(events),
            Err(e) => {
                self.after_failure(&e).await;
                Err(e.into_collaborator(SERVICE))
            }
        }
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<CalendarEvent>, CollaboratorError> {
        match self.fetch_event(event_id).await {
            Ok(event) => Ok(event),
            Err(e) => {
                self.after_failure(&e).await;
                Err(e.into_collaborator(SERVICE))
            }
        }
    }

    async fn create_event(&self, draft: &EventDraft) -> Result<CalendarEvent, CollaboratorError> {
        match self.insert_event(draft).await {
            Ok(event) => Ok(event),
            Err(e) => {
                self.after_failure(&e).await;
                Err(e.into_collaborator(SERVICE))
            }
        }
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), CollaboratorError> {
        match self.remove_event(event_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.after_failure(&e).await;
                Err(e.into_collaborator(SERVICE))
            }
        }
    }
}
