//! Calendar change detection.
//!
//! A push notification only says "something changed". The detector turns it
//! into the list of upcoming events worth tracking: it fetches the lookahead
//! window from the calendar and keeps events whose title contains the keyword
//! and whose start leaves both deferred steps in the future. It never reads
//! the meeting store.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use meetconfirm_core::{CalendarEvent, LifecycleOffsets};

use crate::collaborators::{CalendarProvider, TimeWindow};
use crate::error::CollaboratorError;

/// The provider's `X-Goog-Resource-State` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    /// Handshake sent when a channel is created. Carries no change.
    Sync,
    Exists,
    NotExists,
    Other(String),
}

impl ResourceState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sync" => ResourceState::Sync,
            "exists" => ResourceState::Exists,
            "not_exists" => ResourceState::NotExists,
            other => ResourceState::Other(other.to_string()),
        }
    }
}

/// An inbound change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub resource_state: ResourceState,
    pub channel_id: Option<String>,
    pub channel_token: Option<String>,
    pub message_number: Option<u64>,
}

impl ChangeNotification {
    pub fn new(resource_state: ResourceState) -> Self {
        Self {
            resource_state,
            channel_id: None,
            channel_token: None,
            message_number: None,
        }
    }

    pub fn is_sync(&self) -> bool {
        self.resource_state == ResourceState::Sync
    }
}

/// Verdict on a single fetched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relevance {
    Relevant,
    Cancelled,
    KeywordMismatch,
    /// Starts too soon for the confirmation step to still be ahead.
    TooSoon,
    /// No attendee other than the organizer.
    NoAttendee,
}

impl fmt::Display for Relevance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Relevance::Relevant => "relevant",
            Relevance::Cancelled => "cancelled",
            Relevance::KeywordMismatch => "keyword_mismatch",
            Relevance::TooSoon => "too_soon",
            Relevance::NoAttendee => "no_attendee",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ChangeDetector {
    /// Lowercased for matching.
    keyword: String,
    title_keyword: String,
    offsets: LifecycleOffsets,
    lookahead: Duration,
}

impl ChangeDetector {
    pub fn new(keyword: &str, offsets: LifecycleOffsets, lookahead: Duration) -> Self {
        Self {
            keyword: keyword.trim().to_lowercase(),
            title_keyword: keyword.trim().to_string(),
            offsets,
            lookahead,
        }
    }

    /// The keyword as configured, for titling events this service creates.
    pub fn title_keyword(&self) -> &str {
        &self.title_keyword
    }

    pub fn offsets(&self) -> &LifecycleOffsets {
        &self.offsets
    }

    /// Event starts considered on each notification.
    pub fn fetch_window(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow {
            start: now,
            end: now + self.lookahead,
        }
    }

    /// Judge one event against the keyword and the timing constraint.
    pub fn relevance(&self, event: &CalendarEvent, now: DateTime<Utc>) -> Relevance {
        if event.cancelled {
            return Relevance::Cancelled;
        }
        if !event.title.to_lowercase().contains(&self.keyword) {
            return Relevance::KeywordMismatch;
        }
        // send_offset > enforce_offset, so this also puts enforce_at ahead.
        if self.offsets.confirm_send_at(event.start) <= now {
            return Relevance::TooSoon;
        }
        match event.attendee_email.as_deref() {
            Some(email) if !email.trim().is_empty() => Relevance::Relevant,
            _ => Relevance::NoAttendee,
        }
    }

    /// Keep relevant events, first occurrence of each id only.
    pub fn select(&self, events: Vec<CalendarEvent>, now: DateTime<Utc>) -> Vec<CalendarEvent> {
        let mut seen = HashSet::new();
        events
            .into_iter()
            .filter(|event| {
                let verdict = self.relevance(event, now);
                if verdict != Relevance::Relevant {
                    debug!(event_id = %event.id, %verdict, "Event ignored");
                    return false;
                }
                seen.insert(event.id.clone())
            })
            .collect()
    }

    /// Fetch upcoming events and return the relevant ones.
    pub async fn detect(
        &self,
        calendar: &dyn CalendarProvider,
        now: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, CollaboratorError> {
        let events = calendar.fetch_events(self.fetch_window(now)).await?;
        let fetched = events.len();
        let relevant = self.select(events, now);
        debug!(fetched, relevant = relevant.len(), "Calendar scanned");
        Ok(relevant)
    }
}
