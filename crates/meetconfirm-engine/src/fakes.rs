//! In-memory calendar and email collaborators for tests across the workspace.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use meetconfirm_core::CalendarEvent;

use crate::collaborators::{CalendarProvider, EmailMessage, EmailSender, EventDraft, TimeWindow};
use crate::error::CollaboratorError;

/// Calendar holding events in a map; records deletions.
#[derive(Default)]
pub struct InMemoryCalendar {
    events: Mutex<BTreeMap<String, CalendarEvent>>,
    deleted: Mutex<Vec<String>>,
    created: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: impl IntoIterator<Item = CalendarEvent>) -> Self {
        let calendar = Self::new();
        for event in events {
            calendar.insert(event);
        }
        calendar
    }

    pub fn insert(&self, event: CalendarEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.insert(event.id.clone(), event);
        }
    }

    /// Make every call fail with a retryable error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Ids passed to `delete_event`, in call order (repeats included).
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().map(|d| d.clone()).unwrap_or_default()
    }

    fn check(&self) -> Result<(), CollaboratorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("calendar", "marked unavailable"));
        }
        Ok(())
    }

    fn lock_events(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, CalendarEvent>>, CollaboratorError> {
        self.events
            .lock()
            .map_err(|e| CollaboratorError::unavailable("calendar", e.to_string()))
    }
}

#[async_trait]
impl CalendarProvider for InMemoryCalendar {
    async fn fetch_events(&self, window: TimeWindow) -> Result<Vec<CalendarEvent>, CollaboratorError> {
        self.check()?;
        let mut events: Vec<CalendarEvent> = self
            .lock_events()?
            .values()
            .filter(|e| window.contains(e.start))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.start);
        Ok(events)
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<CalendarEvent>, CollaboratorError> {
        self.check()?;
        Ok(self.lock_events()?.get(event_id).cloned())
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), CollaboratorError> {
        self.check()?;
        self.lock_events()?.remove(event_id);
        self.deleted
            .lock()
            .map_err(|e| CollaboratorError::unavailable("calendar", e.to_string()))?
            .push(event_id.to_string());
        Ok(())
    }

    async fn create_event(&self, draft: &EventDraft) -> Result<CalendarEvent, CollaboratorError> {
        self.check()?;
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let event = CalendarEvent {
            id: format!("created-{}", n),
            title: draft.title.clone(),
            start: draft.start,
            end: draft.end,
            attendee_email: Some(draft.attendee_email.clone()),
            organizer_email: None,
            cancelled: false,
            html_link: None,
        };
        self.lock_events()?.insert(event.id.clone(), event.clone());
        Ok(event)
    }
}

/// Mailbox address reported by `RecordingEmailSender`.
pub const RECORDING_SENDER_ADDRESS: &str = "owner@example.com";

/// Email sender that records every message instead of delivering it.
#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<EmailMessage>>,
    unavailable: AtomicBool,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), CollaboratorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("email", "marked unavailable"));
        }
        self.sent
            .lock()
            .map_err(|e| CollaboratorError::unavailable("email", e.to_string()))?
            .push(message.clone());
        Ok(())
    }

    async fn sender_address(&self) -> Result<String, CollaboratorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("email", "marked unavailable"));
        }
        Ok(RECORDING_SENDER_ADDRESS.to_string())
    }
}
