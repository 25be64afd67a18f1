//! Interfaces to the calendar provider and the email sender.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use meetconfirm_core::CalendarEvent;

use crate::error::CollaboratorError;

/// Half-open time range `[start, end)` of event start times to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// A new timed event to add to the calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub title: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attendee_email: String,
}

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Upcoming events starting inside `window`. Deleted events may be
    /// omitted or returned with `cancelled = true`.
    async fn fetch_events(&self, window: TimeWindow) -> Result<Vec<CalendarEvent>, CollaboratorError>;

    async fn get_event(&self, event_id: &str) -> Result<Option<CalendarEvent>, CollaboratorError>;

    /// Delete an event. Deleting one that is already gone succeeds.
    async fn delete_event(&self, event_id: &str) -> Result<(), CollaboratorError>;

    /// Insert a new event and return it as stored.
    async fn create_event(&self, draft: &EventDraft) -> Result<CalendarEvent, CollaboratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplate {
    /// Asks the attendee to confirm or cancel. Variables: `meeting_title`,
    /// `meeting_start`, `confirm_url`, `cancel_url`.
    ConfirmationRequest,
    /// Tells the attendee the meeting was cancelled. Variables: `meeting_title`,
    /// `meeting_start`, `cancelled_by` (`user` or `system`).
    CancellationNotice,
    /// Sent to the operator's own mailbox by the onboarding check.
    /// Variables: `event_title_keyword`.
    OnboardingWelcome,
}

impl fmt::Display for EmailTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmailTemplate::ConfirmationRequest => f.write_str("confirmation_request"),
            EmailTemplate::CancellationNotice => f.write_str("cancellation_notice"),
            EmailTemplate::OnboardingWelcome => f.write_str("onboarding_welcome"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub template: EmailTemplate,
    pub recipient: String,
    pub variables: BTreeMap<String, String>,
}

impl EmailMessage {
    pub fn new(template: EmailTemplate, recipient: impl Into<String>) -> Self {
        Self {
            template,
            recipient: recipient.into(),
            variables: BTreeMap::new(),
        }
    }

    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.variables.insert(key.to_string(), value.into());
        self
    }

    /// Value of a template variable, or the empty string.
    pub fn get(&self, key: &str) -> &str {
        self.variables.get(key).map(String::as_str).unwrap_or("")
    }
}

/// Delivers templated emails. Duplicate sends are tolerated.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), CollaboratorError>;

    /// Address of the mailbox the emails are sent from.
    async fn sender_address(&self) -> Result<String, CollaboratorError>;
}
