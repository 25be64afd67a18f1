//! End-to-end lifecycle scenarios against in-memory collaborators.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use meetconfirm_core::{
    CalendarEvent, LifecycleOffsets, MeetingRecord, MeetingStatus, NotificationKind, TaskKind,
    UserAction,
};
use meetconfirm_engine::fakes::{InMemoryCalendar, RecordingEmailSender, RECORDING_SENDER_ADDRESS};
use meetconfirm_engine::secrets::{CHANNEL_TOKEN, SIGNING_KEY};
use meetconfirm_engine::{
    CalendarProvider, CallbackOutcome, ChangeDetector, ChangeNotification, Clock,
    DetectionOutcome, EmailTemplate, ManualClock, MemoryTaskService, NotificationOutcome,
    Orchestrator, OrchestratorDeps, OrchestratorError, OrchestratorSettings, ResourceState,
    SchedulerClient, StaticSecretStore, TimeWindow, TokenCodec, UserActionOutcome,
};
use meetconfirm_storage::{
    AuditLog, CreateOutcome, MeetingStore, MemoryAuditLog, MemoryMeetingStore, StoreError,
};

const KEY: &str = "lifecycle-test-key";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

/// Work that commits between a handler's read and its conditional write.
enum Interleaved {
    Click(UserAction, String),
    Enforce,
}

/// Memory store that runs one interleaved handler right after the next read.
#[derive(Default)]
struct InterleavingStore {
    inner: Arc<MemoryMeetingStore>,
    orch: OnceLock<Weak<Orchestrator>>,
    next: Mutex<Option<Interleaved>>,
}

#[async_trait]
impl MeetingStore for InterleavingStore {
    async fn create_if_absent(&self, record: &MeetingRecord) -> Result<CreateOutcome, StoreError> {
        self.inner.create_if_absent(record).await
    }

    async fn conditional_update(
        &self,
        meeting_id: &str,
        expected: MeetingStatus,
        next: &MeetingRecord,
    ) -> Result<MeetingRecord, StoreError> {
        self.inner.conditional_update(meeting_id, expected, next).await
    }

    async fn get(&self, meeting_id: &str) -> Result<Option<MeetingRecord>, StoreError> {
        let read = self.inner.get(meeting_id).await?;
        let interleaved = self.next.lock().unwrap().take();
        if let Some(work) = interleaved {
            let orch = self.orch.get().and_then(Weak::upgrade).unwrap();
            match work {
                Interleaved::Click(action, token) => {
                    orch.on_user_action(meeting_id, action, &token).await.unwrap();
                }
                Interleaved::Enforce => {
                    orch.on_enforce_deadline(meeting_id).await.unwrap();
                }
            }
        }
        Ok(read)
    }
}

struct World {
    orch: Arc<Orchestrator>,
    store: Arc<MemoryMeetingStore>,
    interleaving: Arc<InterleavingStore>,
    audit: Arc<MemoryAuditLog>,
    tasks: Arc<MemoryTaskService>,
    calendar: Arc<InMemoryCalendar>,
    email: Arc<RecordingEmailSender>,
    clock: Arc<ManualClock>,
}

impl World {
    fn new() -> Self {
        Self::with_secrets(StaticSecretStore::new().with(SIGNING_KEY, KEY))
    }

    fn with_secrets(secrets: StaticSecretStore) -> Self {
        let store = Arc::new(MemoryMeetingStore::new());
        let interleaving = Arc::new(InterleavingStore {
            inner: store.clone(),
            ..InterleavingStore::default()
        });
        let audit = Arc::new(MemoryAuditLog::new());
        let tasks = Arc::new(MemoryTaskService::new());
        let calendar = Arc::new(InMemoryCalendar::new());
        let email = Arc::new(RecordingEmailSender::new());
        let clock = Arc::new(ManualClock::new(t0()));

        let deps = OrchestratorDeps {
            store: interleaving.clone(),
            audit: audit.clone(),
            scheduler: SchedulerClient::new(tasks.clone()),
            calendar: calendar.clone(),
            email: email.clone(),
            secrets: Arc::new(secrets),
            clock: clock.clone(),
        };
        let detector = ChangeDetector::new(
            "Consultation",
            LifecycleOffsets::from_minutes(120, 60).unwrap(),
            Duration::days(14),
        );
        let orch = Arc::new(Orchestrator::new(
            deps,
            detector,
            OrchestratorSettings::new("https://confirm.example.com", chrono_tz::UTC),
        ));
        let _ = interleaving.orch.set(Arc::downgrade(&orch));

        Self {
            orch,
            store,
            interleaving,
            audit,
            tasks,
            calendar,
            email,
            clock,
        }
    }

    async fn status(&self, id: &str) -> MeetingStatus {
        self.store.get(id).await.unwrap().unwrap().status
    }

    /// Deliver every task due at the current time, like the hosted queue would.
    async fn deliver_due(&self) -> Vec<(TaskKind, CallbackOutcome)> {
        let mut results = Vec::new();
        for task in self.tasks.take_due(self.clock.now()) {
            let outcome = self
                .orch
                .run_task(task.kind, &task.meeting_id)
                .await
                .unwrap();
            results.push((task.kind, outcome));
        }
        results
    }

    fn token(&self, id: &str, action: UserAction) -> String {
        TokenCodec::new(KEY.as_bytes())
            .unwrap()
            .issue(id, action, self.clock.now())
    }

    /// Commit a link click right after the next handler reads the meeting.
    fn click_during_next_read(&self, id: &str, action: UserAction) {
        let token = self.token(id, action);
        *self.interleaving.next.lock().unwrap() = Some(Interleaved::Click(action, token));
    }

    /// Deliver the enforce callback right after the next handler reads the meeting.
    fn enforce_during_next_read(&self) {
        *self.interleaving.next.lock().unwrap() = Some(Interleaved::Enforce);
    }

    /// Detect `evt-1` and deliver its confirmation request.
    async fn awaiting_confirmation(&self) {
        self.calendar.insert(consultation("evt-1"));
        self.orch.on_event_detected(&consultation("evt-1")).await.unwrap();
        self.clock.set(t0() + Duration::hours(2));
        self.deliver_due().await;
        assert_eq!(self.status("evt-1").await, MeetingStatus::ConfirmationSent);
    }

    fn templates_sent(&self) -> Vec<EmailTemplate> {
        self.email.sent().into_iter().map(|m| m.template).collect()
    }

    async fn audit_actions(&self, id: &str) -> Vec<String> {
        self.audit
            .history(id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect()
    }
}

/// A relevant event starting at T0+4h: send at T0+2h, enforce at T0+3h.
fn consultation(id: &str) -> CalendarEvent {
    let start = t0() + Duration::hours(4);
    CalendarEvent {
        id: id.to_string(),
        title: "Initial Consultation".to_string(),
        start,
        end: start + Duration::minutes(45),
        attendee_email: Some("guest@example.com".to_string()),
        organizer_email: Some("host@example.com".to_string()),
        cancelled: false,
        html_link: None,
    }
}

fn push() -> ChangeNotification {
    ChangeNotification::new(ResourceState::Exists)
}

fn token_from_url(url: &str) -> String {
    url.split("token=").nth(1).unwrap_or_default().to_string()
}

#[tokio::test]
async fn test_confirmed_meeting_is_not_cancelled_at_deadline() {
    let w = World::new();
    w.calendar.insert(consultation("evt-1"));

    let outcome = w.orch.on_calendar_notification(&push()).await.unwrap();
    assert_eq!(
        outcome,
        NotificationOutcome::Processed {
            detected: 1,
            created: 1
        }
    );
    assert_eq!(w.status("evt-1").await, MeetingStatus::Pending);
    assert_eq!(w.tasks.tasks().len(), 2);

    // T0+2h: confirmation request goes out.
    w.clock.set(t0() + Duration::hours(2));
    let delivered = w.deliver_due().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, TaskKind::SendConfirmation);
    assert_eq!(w.status("evt-1").await, MeetingStatus::ConfirmationSent);

    let sent = w.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].template, EmailTemplate::ConfirmationRequest);
    assert_eq!(sent[0].recipient, "guest@example.com");
    assert_eq!(sent[0].get("meeting_title"), "Initial Consultation");

    // T0+2.5h: attendee clicks the confirm link from the email.
    w.clock.set(t0() + Duration::minutes(150));
    let token = token_from_url(sent[0].get("confirm_url"));
    let result = w
        .orch
        .on_user_action("evt-1", UserAction::Confirm, &token)
        .await
        .unwrap();
    assert!(matches!(result, UserActionOutcome::Applied(ref r) if r.status == MeetingStatus::Confirmed));

    // T0+3h: deadline passes without effect.
    w.clock.set(t0() + Duration::hours(3));
    let delivered = w.deliver_due().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(
        delivered[0].1,
        CallbackOutcome::Skipped(MeetingStatus::Confirmed)
    );
    assert_eq!(w.status("evt-1").await, MeetingStatus::Confirmed);
    assert!(w.calendar.deleted().is_empty());
    assert_eq!(w.email.sent().len(), 1);

    let actions = w.audit_actions("evt-1").await;
    assert!(actions.contains(&"created".to_string()));
    assert!(actions.contains(&"confirmation_sent".to_string()));
    assert!(actions.contains(&"confirmed".to_string()));
}

#[tokio::test]
async fn test_unconfirmed_meeting_is_cancelled_once() {
    let w = World::new();
    w.orch.on_event_detected(&consultation("evt-1")).await.unwrap();

    w.clock.set(t0() + Duration::hours(2));
    w.deliver_due().await;

    w.clock.set(t0() + Duration::hours(3));
    let delivered = w.deliver_due().await;
    assert!(matches!(delivered[0].1, CallbackOutcome::Applied(_)));
    assert_eq!(w.status("evt-1").await, MeetingStatus::CancelledBySystem);
    assert_eq!(w.calendar.deleted(), vec!["evt-1"]);

    let sent = w.email.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].template, EmailTemplate::CancellationNotice);
    assert_eq!(sent[1].get("cancelled_by"), "system");

    // Redelivery of the enforce callback does nothing.
    let again = w.orch.on_enforce_deadline("evt-1").await.unwrap();
    assert_eq!(
        again,
        CallbackOutcome::Skipped(MeetingStatus::CancelledBySystem)
    );
    assert_eq!(w.calendar.deleted().len(), 1);
    assert_eq!(w.email.sent().len(), 2);

    let notifications = w.audit.notifications("evt-1").await.unwrap();
    assert_eq!(notifications.len(), 2);
}

#[tokio::test]
async fn test_duplicate_detection_creates_one_record_and_one_task_per_kind() {
    let w = World::new();
    w.calendar.insert(consultation("evt-1"));

    w.orch.on_calendar_notification(&push()).await.unwrap();
    let second = w.orch.on_calendar_notification(&push()).await.unwrap();
    assert_eq!(
        second,
        NotificationOutcome::Processed {
            detected: 1,
            created: 0
        }
    );

    assert_eq!(w.store.len(), 1);
    assert_eq!(w.tasks.tasks().len(), 2);
    assert_eq!(w.tasks.create_attempts(), 4);
}

#[tokio::test]
async fn test_redetecting_keeps_original_schedule() {
    let w = World::new();
    w.orch.on_event_detected(&consultation("evt-1")).await.unwrap();

    let mut moved = consultation("evt-1");
    moved.start += Duration::days(1);
    moved.end += Duration::days(1);
    let outcome = w.orch.on_event_detected(&moved).await.unwrap();

    let DetectionOutcome::AlreadyTracked(record) = outcome else {
        panic!("expected AlreadyTracked");
    };
    assert_eq!(record.scheduled_start, t0() + Duration::hours(4));
}

#[tokio::test]
async fn test_confirm_before_send_skips_confirmation_email() {
    let w = World::new();
    w.orch.on_event_detected(&consultation("evt-1")).await.unwrap();

    let token = w.token("evt-1", UserAction::Confirm);
    w.orch
        .on_user_action("evt-1", UserAction::Confirm, &token)
        .await
        .unwrap();
    assert_eq!(w.status("evt-1").await, MeetingStatus::Confirmed);

    w.clock.set(t0() + Duration::hours(3));
    let delivered = w.deliver_due().await;
    assert_eq!(delivered.len(), 2);
    for (_, outcome) in delivered {
        assert_eq!(outcome, CallbackOutcome::Skipped(MeetingStatus::Confirmed));
    }
    assert!(w.email.sent().is_empty());
}

#[tokio::test]
async fn test_user_cancel_deletes_event_and_blocks_later_steps() {
    let w = World::new();
    w.calendar.insert(consultation("evt-1"));
    w.orch.on_event_detected(&consultation("evt-1")).await.unwrap();
    w.clock.set(t0() + Duration::hours(2));
    w.deliver_due().await;

    let token = w.token("evt-1", UserAction::Cancel);
    let result = w
        .orch
        .on_user_action("evt-1", UserAction::Cancel, &token)
        .await
        .unwrap();
    assert!(matches!(result, UserActionOutcome::Applied(_)));
    assert_eq!(w.status("evt-1").await, MeetingStatus::CancelledByUser);
    assert_eq!(w.calendar.deleted(), vec!["evt-1"]);

    let notice = w.email.sent().pop().unwrap();
    assert_eq!(notice.template, EmailTemplate::CancellationNotice);
    assert_eq!(notice.get("cancelled_by"), "user");

    // Clicking again, or confirming afterwards, reports already processed.
    let again = w
        .orch
        .on_user_action("evt-1", UserAction::Cancel, &token)
        .await
        .unwrap();
    assert!(matches!(again, UserActionOutcome::AlreadyProcessed(_)));
    let confirm = w.token("evt-1", UserAction::Confirm);
    let late = w
        .orch
        .on_user_action("evt-1", UserAction::Confirm, &confirm)
        .await
        .unwrap();
    assert!(matches!(late, UserActionOutcome::AlreadyProcessed(ref r) if r.status == MeetingStatus::CancelledByUser));

    w.clock.set(t0() + Duration::hours(3));
    w.deliver_due().await;
    assert_eq!(w.status("evt-1").await, MeetingStatus::CancelledByUser);
    assert_eq!(w.calendar.deleted().len(), 1);
}

#[tokio::test]
async fn test_racing_confirm_and_cancel_settle_on_one_outcome() {
    let w = World::new();
    w.orch.on_event_detected(&consultation("evt-1")).await.unwrap();
    w.clock.set(t0() + Duration::hours(2));
    w.deliver_due().await;

    let confirm = w.token("evt-1", UserAction::Confirm);
    let cancel = w.token("evt-1", UserAction::Cancel);
    let (a, b) = tokio::join!(
        w.orch.on_user_action("evt-1", UserAction::Confirm, &confirm),
        w.orch.on_user_action("evt-1", UserAction::Cancel, &cancel),
    );
    let applied = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|o| matches!(o, UserActionOutcome::Applied(_)))
        .count();
    assert_eq!(applied, 1);
    assert!(w.status("evt-1").await.is_terminal());
}

#[tokio::test]
async fn test_rejected_tokens_leave_meeting_untouched() {
    let w = World::new();
    w.orch.on_event_detected(&consultation("evt-1")).await.unwrap();
    w.orch.on_event_detected(&consultation("evt-2")).await.unwrap();

    let cancel = w.token("evt-1", UserAction::Cancel);
    let other = w.token("evt-2", UserAction::Confirm);
    let foreign = TokenCodec::new(b"some-other-key")
        .unwrap()
        .issue("evt-1", UserAction::Confirm, t0());

    for token in [cancel.as_str(), other.as_str(), foreign.as_str(), "garbage"] {
        let err = w
            .orch
            .on_user_action("evt-1", UserAction::Confirm, token)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidToken(_)));
        assert!(!err.is_retryable());
    }

    assert_eq!(w.status("evt-1").await, MeetingStatus::Pending);
    let rejected = w
        .audit_actions("evt-1")
        .await
        .into_iter()
        .filter(|a| a == "token_rejected")
        .count();
    assert_eq!(rejected, 4);
}

#[tokio::test]
async fn test_pending_at_deadline_is_left_alone() {
    let w = World::new();
    w.orch.on_event_detected(&consultation("evt-1")).await.unwrap();

    let outcome = w.orch.on_enforce_deadline("evt-1").await.unwrap();
    assert_eq!(outcome, CallbackOutcome::Skipped(MeetingStatus::Pending));
    assert_eq!(w.status("evt-1").await, MeetingStatus::Pending);
    assert!(w.calendar.deleted().is_empty());
}

#[tokio::test]
async fn test_unknown_meeting_callbacks_are_no_ops() {
    let w = World::new();
    assert_eq!(
        w.orch.on_send_confirmation("nope").await.unwrap(),
        CallbackOutcome::NotFound
    );
    assert_eq!(
        w.orch.on_enforce_deadline("nope").await.unwrap(),
        CallbackOutcome::NotFound
    );
    let token = w.token("nope", UserAction::Confirm);
    assert_eq!(
        w.orch
            .on_user_action("nope", UserAction::Confirm, &token)
            .await
            .unwrap(),
        UserActionOutcome::NotFound
    );
}

#[tokio::test]
async fn test_email_outage_keeps_meeting_pending_for_retry() {
    let w = World::new();
    w.orch.on_event_detected(&consultation("evt-1")).await.unwrap();
    w.email.set_unavailable(true);

    let err = w.orch.on_send_confirmation("evt-1").await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(w.status("evt-1").await, MeetingStatus::Pending);

    w.email.set_unavailable(false);
    w.orch.on_send_confirmation("evt-1").await.unwrap();
    assert_eq!(w.status("evt-1").await, MeetingStatus::ConfirmationSent);
}

#[tokio::test]
async fn test_scheduler_outage_is_repaired_on_redelivery() {
    let w = World::new();
    w.calendar.insert(consultation("evt-1"));
    w.tasks.set_unavailable(true);

    let err = w.orch.on_calendar_notification(&push()).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(w.status("evt-1").await, MeetingStatus::Pending);
    assert!(w.tasks.tasks().is_empty());

    w.tasks.set_unavailable(false);
    w.orch.on_calendar_notification(&push()).await.unwrap();
    assert_eq!(w.tasks.tasks().len(), 2);
}

#[tokio::test]
async fn test_sync_notification_is_acknowledged_without_fetching() {
    let w = World::new();
    w.calendar.set_unavailable(true);
    let outcome = w
        .orch
        .on_calendar_notification(&ChangeNotification::new(ResourceState::Sync))
        .await
        .unwrap();
    assert_eq!(outcome, NotificationOutcome::SyncAcknowledged);
}

#[tokio::test]
async fn test_calendar_outage_on_notification_is_retryable() {
    let w = World::new();
    w.calendar.set_unavailable(true);
    let err = w.orch.on_calendar_notification(&push()).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_channel_token_is_enforced_when_configured() {
    let w = World::with_secrets(
        StaticSecretStore::new()
            .with(SIGNING_KEY, KEY)
            .with(CHANNEL_TOKEN, "chan-secret"),
    );
    w.calendar.insert(consultation("evt-1"));

    let err = w.orch.on_calendar_notification(&push()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UntrustedNotification));
    assert!(w.store.is_empty());

    let mut trusted = push();
    trusted.channel_token = Some("chan-secret".to_string());
    w.orch.on_calendar_notification(&trusted).await.unwrap();
    assert_eq!(w.store.len(), 1);
}

#[tokio::test]
async fn test_irrelevant_and_malformed_events_are_dropped() {
    let w = World::new();
    let mut too_soon = consultation("soon");
    too_soon.start = t0() + Duration::minutes(90);
    too_soon.end = too_soon.start + Duration::minutes(30);
    let mut other = consultation("other");
    other.title = "Weekly sync".to_string();
    let mut lonely = consultation("lonely");
    lonely.attendee_email = None;
    for event in [too_soon, other, lonely, consultation("good")] {
        w.calendar.insert(event);
    }

    let outcome = w.orch.on_calendar_notification(&push()).await.unwrap();
    assert_eq!(
        outcome,
        NotificationOutcome::Processed {
            detected: 1,
            created: 1
        }
    );
    assert_eq!(w.store.len(), 1);
}

#[tokio::test]
async fn test_confirm_committed_during_enforce_wins() {
    let w = World::new();
    w.awaiting_confirmation().await;
    w.clock.set(t0() + Duration::hours(3));

    w.click_during_next_read("evt-1", UserAction::Confirm);
    let outcome = w.orch.on_enforce_deadline("evt-1").await.unwrap();

    assert_eq!(outcome, CallbackOutcome::Skipped(MeetingStatus::Confirmed));
    assert_eq!(w.status("evt-1").await, MeetingStatus::Confirmed);
    assert!(w.calendar.deleted().is_empty());
    assert_eq!(
        w.templates_sent(),
        vec![EmailTemplate::ConfirmationRequest]
    );
    assert!(w
        .audit_actions("evt-1")
        .await
        .contains(&"transition_skipped".to_string()));
}

#[tokio::test]
async fn test_user_cancel_committed_during_enforce_keeps_user_outcome() {
    let w = World::new();
    w.awaiting_confirmation().await;
    w.clock.set(t0() + Duration::hours(3));

    w.click_during_next_read("evt-1", UserAction::Cancel);
    let outcome = w.orch.on_enforce_deadline("evt-1").await.unwrap();

    assert_eq!(
        outcome,
        CallbackOutcome::Skipped(MeetingStatus::CancelledByUser)
    );
    assert_eq!(w.status("evt-1").await, MeetingStatus::CancelledByUser);
    assert_eq!(w.calendar.deleted(), vec!["evt-1"]);
    let sent = w.email.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].template, EmailTemplate::CancellationNotice);
    assert_eq!(sent[1].get("cancelled_by"), "user");
}

#[tokio::test]
async fn test_confirm_loses_to_enforce_committed_first() {
    let w = World::new();
    w.awaiting_confirmation().await;
    w.clock.set(t0() + Duration::hours(3));

    w.enforce_during_next_read();
    let token = w.token("evt-1", UserAction::Confirm);
    let outcome = w
        .orch
        .on_user_action("evt-1", UserAction::Confirm, &token)
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        UserActionOutcome::AlreadyProcessed(ref r) if r.status == MeetingStatus::CancelledBySystem
    ));
    assert_eq!(w.status("evt-1").await, MeetingStatus::CancelledBySystem);
    assert_eq!(w.calendar.deleted(), vec!["evt-1"]);
    assert_eq!(
        w.templates_sent(),
        vec![
            EmailTemplate::ConfirmationRequest,
            EmailTemplate::CancellationNotice
        ]
    );
}

#[tokio::test]
async fn test_enforce_cleanup_is_finished_on_redelivery() {
    let w = World::new();
    w.awaiting_confirmation().await;
    w.clock.set(t0() + Duration::hours(3));

    w.calendar.set_unavailable(true);
    let err = w.orch.on_enforce_deadline("evt-1").await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(w.status("evt-1").await, MeetingStatus::CancelledBySystem);
    assert!(w.calendar.deleted().is_empty());

    w.calendar.set_unavailable(false);
    let again = w.orch.on_enforce_deadline("evt-1").await.unwrap();
    assert_eq!(
        again,
        CallbackOutcome::Skipped(MeetingStatus::CancelledBySystem)
    );
    assert_eq!(w.calendar.deleted(), vec!["evt-1"]);
    let notice = w.email.sent().pop().unwrap();
    assert_eq!(notice.template, EmailTemplate::CancellationNotice);
    assert_eq!(notice.get("cancelled_by"), "system");

    // Once the notice is logged, further redeliveries change nothing.
    w.orch.on_enforce_deadline("evt-1").await.unwrap();
    assert_eq!(w.calendar.deleted().len(), 1);
    let notices: Vec<_> = w
        .audit
        .notifications("evt-1")
        .await
        .unwrap()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::CancelNotice)
        .collect();
    assert_eq!(notices.len(), 1);
}

#[tokio::test]
async fn test_user_cancel_cleanup_is_finished_on_second_click() {
    let w = World::new();
    w.awaiting_confirmation().await;

    w.email.set_unavailable(true);
    let token = w.token("evt-1", UserAction::Cancel);
    let err = w
        .orch
        .on_user_action("evt-1", UserAction::Cancel, &token)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(w.status("evt-1").await, MeetingStatus::CancelledByUser);

    w.email.set_unavailable(false);
    let again = w
        .orch
        .on_user_action("evt-1", UserAction::Cancel, &token)
        .await
        .unwrap();
    assert!(matches!(again, UserActionOutcome::AlreadyProcessed(_)));
    let notice = w.email.sent().pop().unwrap();
    assert_eq!(notice.template, EmailTemplate::CancellationNotice);
    assert_eq!(notice.get("cancelled_by"), "user");
}

#[tokio::test]
async fn test_onboarding_sends_welcome_and_books_keyword_event() {
    let w = World::new();

    let run = w.orch.run_onboarding_test().await.unwrap();
    assert_eq!(run.recipient, RECORDING_SENDER_ADDRESS);
    assert_eq!(run.event.title, "Consultation - Test Event");
    assert_eq!(run.event.start, t0() + Duration::minutes(123));
    assert_eq!(run.event.end, run.event.start + Duration::hours(1));
    assert_eq!(
        run.event.attendee_email.as_deref(),
        Some(RECORDING_SENDER_ADDRESS)
    );

    let welcome = w.email.sent().pop().unwrap();
    assert_eq!(welcome.template, EmailTemplate::OnboardingWelcome);
    assert_eq!(welcome.recipient, RECORDING_SENDER_ADDRESS);
    assert_eq!(welcome.get("event_title_keyword"), "Consultation");

    let booked = w.calendar.get_event(&run.event.id).await.unwrap().unwrap();
    assert_eq!(booked.title, run.event.title);
    assert!(w
        .audit_actions(&run.event.id)
        .await
        .contains(&"onboarding_test".to_string()));
    assert!(w.store.is_empty());
}

#[tokio::test]
async fn test_onboarding_email_outage_books_nothing() {
    let w = World::new();
    w.email.set_unavailable(true);

    let err = w.orch.run_onboarding_test().await.unwrap_err();
    assert!(err.is_retryable());
    let booked = w
        .calendar
        .fetch_events(TimeWindow {
            start: t0(),
            end: t0() + Duration::days(1),
        })
        .await
        .unwrap();
    assert!(booked.is_empty());
}
