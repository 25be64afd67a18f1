//! Meeting lifecycle orchestrator.
//!
//! Entry points are invoked by independent handlers (webhook, scheduler
//! callback, link click) that may race on the same meeting and may be
//! redelivered. Each one re-reads the record, checks the guard, and commits
//! through a single status-guarded conditional update. Finding the record
//! already past the step is a successful no-op.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::json;
use tracing::{debug, info, warn};

use meetconfirm_core::{
    CalendarEvent, MeetingRecord, MeetingStatus, NotificationKind, TaskKind, UserAction,
};
use meetconfirm_storage::{
    AuditEntry, AuditLog, CreateOutcome, MeetingStore, NotificationEntry, StoreError,
};

use crate::clock::Clock;
use crate::collaborators::{
    CalendarProvider, EmailMessage, EmailSender, EmailTemplate, EventDraft,
};
use crate::detector::{ChangeDetector, ChangeNotification};
use crate::error::OrchestratorError;
use crate::scheduler::SchedulerClient;
use crate::secrets::{SecretStore, CHANNEL_TOKEN, SIGNING_KEY};
use crate::state_machine::{action_applies, validate_transition};
use crate::token::TokenCodec;

/// Upper bound on re-reads when a user action loses a conditional update.
/// The status graph has at most two non-terminal hops, so three suffices.
const MAX_ACTION_ATTEMPTS: usize = 3;

/// Minutes past the send offset at which the onboarding test event starts.
const ONBOARDING_LEAD_MINUTES: i64 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionOutcome {
    Created(MeetingRecord),
    /// A record already existed; nothing changed.
    AlreadyTracked(MeetingRecord),
}

/// Result of a scheduler callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Applied(MeetingRecord),
    /// The guard did not hold; the meeting is in the given status.
    Skipped(MeetingStatus),
    NotFound,
}

impl CallbackOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CallbackOutcome::Applied(_) => "applied",
            CallbackOutcome::Skipped(_) => "skipped",
            CallbackOutcome::NotFound => "not_found",
        }
    }

    pub fn status(&self) -> Option<MeetingStatus> {
        match self {
            CallbackOutcome::Applied(record) => Some(record.status),
            CallbackOutcome::Skipped(status) => Some(*status),
            CallbackOutcome::NotFound => None,
        }
    }
}

/// Result of a verified confirm/cancel click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserActionOutcome {
    Applied(MeetingRecord),
    /// The meeting had already left the states this action applies to.
    AlreadyProcessed(MeetingRecord),
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    SyncAcknowledged,
    Processed { detected: usize, created: usize },
}

/// What the onboarding check sent and booked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardingRun {
    pub recipient: String,
    pub event: CalendarEvent,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Public base URL the confirm/cancel links point at.
    pub service_url: String,
    /// Zone meeting times are rendered in for emails.
    pub time_zone: Tz,
}

impl OrchestratorSettings {
    pub fn new(service_url: &str, time_zone: Tz) -> Self {
        Self {
            service_url: service_url.trim_end_matches('/').to_string(),
            time_zone,
        }
    }
}

/// Everything the orchestrator talks to.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub store: Arc<dyn MeetingStore>,
    pub audit: Arc<dyn AuditLog>,
    pub scheduler: SchedulerClient,
    pub calendar: Arc<dyn CalendarProvider>,
    pub email: Arc<dyn EmailSender>,
    pub secrets: Arc<dyn SecretStore>,
    pub clock: Arc<dyn Clock>,
}

pub struct Orchestrator {
    store: Arc<dyn MeetingStore>,
    audit: Arc<dyn AuditLog>,
    scheduler: SchedulerClient,
    calendar: Arc<dyn CalendarProvider>,
    email: Arc<dyn EmailSender>,
    secrets: Arc<dyn SecretStore>,
    clock: Arc<dyn Clock>,
    detector: ChangeDetector,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps, detector: ChangeDetector, settings: OrchestratorSettings) -> Self {
        Self {
            store: deps.store,
            audit: deps.audit,
            scheduler: deps.scheduler,
            calendar: deps.calendar,
            email: deps.email,
            secrets: deps.secrets,
            clock: deps.clock,
            detector,
            settings,
        }
    }

    pub fn calendar(&self) -> &Arc<dyn CalendarProvider> {
        &self.calendar
    }

    pub fn secrets(&self) -> &Arc<dyn SecretStore> {
        &self.secrets
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Current record for a meeting.
    pub async fn meeting(&self, meeting_id: &str) -> Result<Option<MeetingRecord>, OrchestratorError> {
        Ok(self.store.get(meeting_id).await?)
    }

    // =========================================================================
    // Detection
    // =========================================================================

    /// Handle an inbound calendar push notification.
    ///
    /// Every relevant event is forwarded to `on_event_detected`. Malformed
    /// events are dropped; if any event hits a retryable failure the first
    /// such error is returned after the whole batch has been attempted.
    pub async fn on_calendar_notification(
        &self,
        notification: &ChangeNotification,
    ) -> Result<NotificationOutcome, OrchestratorError> {
        if let Some(expected) = self.secrets.get_optional(CHANNEL_TOKEN).await? {
            if notification.channel_token.as_deref() != Some(expected.as_str()) {
                warn!(
                    channel_id = ?notification.channel_id,
                    "Change notification with wrong channel token"
                );
                return Err(OrchestratorError::UntrustedNotification);
            }
        }

        if notification.is_sync() {
            info!(channel_id = ?notification.channel_id, "Calendar channel sync received");
            return Ok(NotificationOutcome::SyncAcknowledged);
        }

        let events = self
            .detector
            .detect(self.calendar.as_ref(), self.clock.now())
            .await?;

        let mut created = 0;
        let mut first_retryable: Option<OrchestratorError> = None;
        for event in &events {
            match self.on_event_detected(event).await {
                Ok(DetectionOutcome::Created(_)) => created += 1,
                Ok(DetectionOutcome::AlreadyTracked(_)) => {}
                Err(e) if e.is_retryable() => {
                    warn!(event_id = %event.id, error = %e, "Event detection failed; will retry");
                    if first_retryable.is_none() {
                        first_retryable = Some(e);
                    }
                }
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "Event dropped");
                }
            }
        }

        if let Some(e) = first_retryable {
            return Err(e);
        }
        info!(detected = events.len(), created, "Calendar notification processed");
        Ok(NotificationOutcome::Processed {
            detected: events.len(),
            created,
        })
    }

    /// Start tracking a relevant event.
    ///
    /// Creates the `pending` record if absent and schedules both deferred
    /// steps. For an existing `pending` record the scheduling requests are
    /// re-issued with the stored times; name dedup makes that harmless and it
    /// repairs a first attempt that failed after the record was written.
    pub async fn on_event_detected(
        &self,
        event: &CalendarEvent,
    ) -> Result<DetectionOutcome, OrchestratorError> {
        let attendee = validate_event(event)?;
        let now = self.clock.now();
        let record = MeetingRecord::new(
            event.id.as_str(),
            event.title.as_str(),
            event.start,
            event.end,
            attendee,
            self.detector.offsets(),
            now,
        );

        match self.store.create_if_absent(&record).await? {
            CreateOutcome::Created => {
                info!(
                    meeting_id = %record.meeting_id,
                    start = %record.scheduled_start,
                    confirm_send_at = %record.confirm_send_at,
                    enforce_at = %record.enforce_at,
                    "Meeting tracked"
                );
                self.record_audit(
                    &record.meeting_id,
                    "created",
                    json!({
                        "title": record.title,
                        "scheduled_start": record.scheduled_start,
                        "confirm_send_at": record.confirm_send_at,
                        "enforce_at": record.enforce_at,
                        "attendee": record.attendee_ref,
                    }),
                )
                .await;
                self.schedule_steps(&record).await?;
                Ok(DetectionOutcome::Created(record))
            }
            CreateOutcome::AlreadyExists(existing) => {
                debug!(meeting_id = %existing.meeting_id, status = %existing.status, "Meeting already tracked");
                if existing.status == MeetingStatus::Pending {
                    self.schedule_steps(&existing).await?;
                }
                Ok(DetectionOutcome::AlreadyTracked(existing))
            }
        }
    }

    async fn schedule_steps(&self, record: &MeetingRecord) -> Result<(), OrchestratorError> {
        for kind in TaskKind::ALL {
            self.scheduler
                .schedule_once(&record.meeting_id, kind, record.run_at(kind))
                .await?;
        }
        Ok(())
    }

    // =========================================================================
    // Scheduler callbacks
    // =========================================================================

    pub async fn run_task(
        &self,
        kind: TaskKind,
        meeting_id: &str,
    ) -> Result<CallbackOutcome, OrchestratorError> {
        match kind {
            TaskKind::SendConfirmation => self.on_send_confirmation(meeting_id).await,
            TaskKind::EnforceDeadline => self.on_enforce_deadline(meeting_id).await,
        }
    }

    /// Send the confirmation request and move `pending -> confirmation_sent`.
    pub async fn on_send_confirmation(
        &self,
        meeting_id: &str,
    ) -> Result<CallbackOutcome, OrchestratorError> {
        let Some(record) = self.store.get(meeting_id).await? else {
            info!(meeting_id, "Send-confirmation callback for unknown meeting");
            return Ok(CallbackOutcome::NotFound);
        };
        if record.status != MeetingStatus::Pending {
            info!(meeting_id, status = %record.status, "Stale send-confirmation callback");
            return Ok(CallbackOutcome::Skipped(record.status));
        }

        let codec = self.codec().await?;
        let message = self.confirmation_request(&record, &codec, self.clock.now());
        self.send_email(&record, &message, NotificationKind::ConfirmRequest)
            .await?;

        self.commit(&record, MeetingStatus::ConfirmationSent).await
    }

    /// Cancel a meeting nobody confirmed: `confirmation_sent -> cancelled_by_system`.
    ///
    /// The transition is written before the event is deleted, so a confirm
    /// that commits first wins outright. A meeting still `pending` at its
    /// deadline never received a confirmation request and is left alone.
    /// Redelivery to an already cancelled meeting finishes any cleanup the
    /// first delivery did not complete.
    pub async fn on_enforce_deadline(
        &self,
        meeting_id: &str,
    ) -> Result<CallbackOutcome, OrchestratorError> {
        let Some(record) = self.store.get(meeting_id).await? else {
            info!(meeting_id, "Enforce callback for unknown meeting");
            return Ok(CallbackOutcome::NotFound);
        };
        match record.status {
            MeetingStatus::ConfirmationSent => {}
            MeetingStatus::Pending => {
                warn!(
                    meeting_id,
                    "Meeting reached its deadline without a confirmation request; leaving it pending"
                );
                self.record_audit(meeting_id, "deadline_skipped", json!({"status": record.status}))
                    .await;
                return Ok(CallbackOutcome::Skipped(record.status));
            }
            MeetingStatus::CancelledBySystem | MeetingStatus::CancelledByUser => {
                info!(meeting_id, status = %record.status, "Enforce callback for cancelled meeting");
                self.finish_cancellation(&record).await?;
                return Ok(CallbackOutcome::Skipped(record.status));
            }
            status => {
                info!(meeting_id, %status, "Stale enforce callback");
                return Ok(CallbackOutcome::Skipped(status));
            }
        }

        let outcome = self.commit(&record, MeetingStatus::CancelledBySystem).await?;
        if let CallbackOutcome::Applied(stored) = &outcome {
            self.cancel_meeting(stored, "system").await?;
        }
        Ok(outcome)
    }

    // =========================================================================
    // User actions
    // =========================================================================

    /// Apply a confirm/cancel link click after verifying its token.
    pub async fn on_user_action(
        &self,
        meeting_id: &str,
        action: UserAction,
        token: &str,
    ) -> Result<UserActionOutcome, OrchestratorError> {
        if meeting_id.trim().is_empty() {
            return Err(OrchestratorError::MalformedInput(
                "missing meeting id".to_string(),
            ));
        }

        let codec = self.codec().await?;
        if let Err(e) = codec.verify(token, meeting_id, action) {
            warn!(meeting_id, %action, error = %e, "Rejected link token");
            self.record_audit(
                meeting_id,
                "token_rejected",
                json!({"action": action, "reason": e.to_string()}),
            )
            .await;
            return Err(e.into());
        }

        for attempt in 1..=MAX_ACTION_ATTEMPTS {
            let Some(record) = self.store.get(meeting_id).await? else {
                return Ok(UserActionOutcome::NotFound);
            };
            if !action_applies(record.status, action) {
                info!(meeting_id, %action, status = %record.status, "Link already processed");
                if action == UserAction::Cancel && record.status == MeetingStatus::CancelledByUser {
                    self.finish_cancellation(&record).await?;
                }
                return Ok(UserActionOutcome::AlreadyProcessed(record));
            }

            match self.commit(&record, action.target_status()).await? {
                CallbackOutcome::Applied(stored) => {
                    if action == UserAction::Cancel {
                        self.cancel_meeting(&stored, "user").await?;
                    }
                    return Ok(UserActionOutcome::Applied(stored));
                }
                CallbackOutcome::NotFound => return Ok(UserActionOutcome::NotFound),
                CallbackOutcome::Skipped(actual) => {
                    debug!(meeting_id, %action, %actual, attempt, "User action lost a race; re-reading");
                }
            }
        }

        match self.store.get(meeting_id).await? {
            Some(record) => Ok(UserActionOutcome::AlreadyProcessed(record)),
            None => Ok(UserActionOutcome::NotFound),
        }
    }

    // =========================================================================
    // Onboarding
    // =========================================================================

    /// Welcome the operator's own mailbox and book a test event for it.
    ///
    /// Exercises both the mail and calendar credentials. The event carries the
    /// title keyword and starts a few minutes past the send offset.
    pub async fn run_onboarding_test(&self) -> Result<OnboardingRun, OrchestratorError> {
        let recipient = self.email.sender_address().await?;
        if recipient.trim().is_empty() {
            return Err(OrchestratorError::MalformedInput(
                "sender mailbox has no address".to_string(),
            ));
        }

        let keyword = self.detector.title_keyword();
        let welcome = EmailMessage::new(EmailTemplate::OnboardingWelcome, recipient.as_str())
            .var("event_title_keyword", keyword);
        self.email.send(&welcome).await?;
        info!(%recipient, "Onboarding welcome email sent");

        let start = self.clock.now()
            + self.detector.offsets().send_offset()
            + chrono::Duration::minutes(ONBOARDING_LEAD_MINUTES);
        let draft = EventDraft {
            title: format!("{} - Test Event", keyword),
            description: "Test event created by MeetConfirm to demonstrate the confirmation flow."
                .to_string(),
            start,
            end: start + chrono::Duration::hours(1),
            attendee_email: recipient.clone(),
        };
        let event = self.calendar.create_event(&draft).await?;
        info!(event_id = %event.id, start = %event.start, "Onboarding test event created");
        self.record_audit(
            &event.id,
            "onboarding_test",
            json!({"recipient": recipient, "title": event.title}),
        )
        .await;

        Ok(OnboardingRun { recipient, event })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Move `current` to `target` if its status is still what was read.
    async fn commit(
        &self,
        current: &MeetingRecord,
        target: MeetingStatus,
    ) -> Result<CallbackOutcome, OrchestratorError> {
        let meeting_id = current.meeting_id.as_str();
        if let Err(e) = validate_transition(current.status, target) {
            debug!(meeting_id, error = %e, "Transition not allowed");
            return Ok(CallbackOutcome::Skipped(current.status));
        }

        let next = current.with_status(target, self.clock.now());
        match self
            .store
            .conditional_update(meeting_id, current.status, &next)
            .await
        {
            Ok(stored) => {
                info!(meeting_id, from = %current.status, to = %target, "Meeting transitioned");
                self.record_audit(
                    meeting_id,
                    target.as_str(),
                    json!({"from": current.status, "to": target}),
                )
                .await;
                Ok(CallbackOutcome::Applied(stored))
            }
            Err(StoreError::StatusMismatch { actual, .. }) => {
                info!(meeting_id, attempted = %target, %actual, "Transition lost to a concurrent update");
                self.record_audit(
                    meeting_id,
                    "transition_skipped",
                    json!({"attempted": target, "found": actual}),
                )
                .await;
                Ok(CallbackOutcome::Skipped(actual))
            }
            Err(StoreError::NotFound(_)) => Ok(CallbackOutcome::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the calendar event and tell the attendee.
    async fn cancel_meeting(
        &self,
        record: &MeetingRecord,
        cancelled_by: &str,
    ) -> Result<(), OrchestratorError> {
        self.calendar.delete_event(&record.meeting_id).await?;
        let message = self
            .base_message(EmailTemplate::CancellationNotice, record)
            .var("cancelled_by", cancelled_by);
        self.send_email(record, &message, NotificationKind::CancelNotice)
            .await
    }

    /// Repeat the cleanup of a cancelled meeting unless its notice is logged.
    ///
    /// The notice goes out after the delete, so a logged notice means both
    /// steps succeeded. An unreadable log repeats the cleanup.
    async fn finish_cancellation(&self, record: &MeetingRecord) -> Result<(), OrchestratorError> {
        let cancelled_by = match record.status {
            MeetingStatus::CancelledByUser => "user",
            MeetingStatus::CancelledBySystem => "system",
            _ => return Ok(()),
        };
        match self.audit.notifications(&record.meeting_id).await {
            Ok(sent) if sent.iter().any(|n| n.kind == NotificationKind::CancelNotice) => {
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                warn!(meeting_id = %record.meeting_id, error = %e, "Notification log unreadable");
            }
        }
        info!(meeting_id = %record.meeting_id, cancelled_by, "Completing cancellation cleanup");
        self.cancel_meeting(record, cancelled_by).await
    }

    async fn send_email(
        &self,
        record: &MeetingRecord,
        message: &EmailMessage,
        kind: NotificationKind,
    ) -> Result<(), OrchestratorError> {
        self.email.send(message).await?;

        let entry = NotificationEntry::email(
            record.meeting_id.as_str(),
            kind,
            record.attendee_ref.as_str(),
            self.clock.now(),
        );
        if let Err(e) = self.audit.record_notification(&entry).await {
            warn!(meeting_id = %record.meeting_id, error = %e, "Notification log write failed");
        }
        self.record_audit(
            &record.meeting_id,
            "email_sent",
            json!({"template": message.template, "recipient": record.attendee_ref}),
        )
        .await;
        Ok(())
    }

    async fn record_audit(&self, meeting_id: &str, action: &str, detail: serde_json::Value) {
        let entry = AuditEntry::new(meeting_id, action, detail, self.clock.now());
        if let Err(e) = self.audit.record(&entry).await {
            warn!(meeting_id, action, error = %e, "Audit write failed");
        }
    }

    async fn codec(&self) -> Result<TokenCodec, OrchestratorError> {
        let key = self.secrets.get(SIGNING_KEY).await?;
        Ok(TokenCodec::new(key.as_bytes())?)
    }

    fn confirmation_request(
        &self,
        record: &MeetingRecord,
        codec: &TokenCodec,
        now: DateTime<Utc>,
    ) -> EmailMessage {
        let confirm = codec.issue(&record.meeting_id, UserAction::Confirm, now);
        let cancel = codec.issue(&record.meeting_id, UserAction::Cancel, now);
        self.base_message(EmailTemplate::ConfirmationRequest, record)
            .var(
                "confirm_url",
                self.action_url(UserAction::Confirm, &record.meeting_id, &confirm),
            )
            .var(
                "cancel_url",
                self.action_url(UserAction::Cancel, &record.meeting_id, &cancel),
            )
    }

    fn base_message(&self, template: EmailTemplate, record: &MeetingRecord) -> EmailMessage {
        EmailMessage::new(template, record.attendee_ref.as_str())
            .var("meeting_title", record.title.as_str())
            .var("meeting_start", self.format_time(record.scheduled_start))
            .var("meeting_end", self.format_time(record.scheduled_end))
            .var("timezone", self.settings.time_zone.name())
    }

    /// Link a user clicks to apply `action`.
    pub fn action_url(&self, action: UserAction, meeting_id: &str, token: &str) -> String {
        format!(
            "{}/api/v1/{}?meeting_id={}&token={}",
            self.settings.service_url,
            action.as_str(),
            urlencoding::encode(meeting_id),
            urlencoding::encode(token)
        )
    }

    fn format_time(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.settings.time_zone)
            .format("%A, %-d %B %Y, %H:%M")
            .to_string()
    }
}

/// Reject events the lifecycle cannot work with. Returns the attendee address.
fn validate_event(event: &CalendarEvent) -> Result<&str, OrchestratorError> {
    if event.id.trim().is_empty() {
        return Err(OrchestratorError::MalformedInput(
            "event without id".to_string(),
        ));
    }
    if event.cancelled {
        return Err(OrchestratorError::MalformedInput(format!(
            "event {} is cancelled",
            event.id
        )));
    }
    if event.end < event.start {
        return Err(OrchestratorError::MalformedInput(format!(
            "event {} ends before it starts",
            event.id
        )));
    }
    event
        .attendee_email
        .as_deref()
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .ok_or_else(|| {
            OrchestratorError::MalformedInput(format!("event {} has no attendee", event.id))
        })
}
