use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MeetConfirmError;

// =============================================================================
// Enums
// =============================================================================

/// Lifecycle status of a tracked meeting.
///
/// `Pending -> ConfirmationSent -> {Confirmed, CancelledByUser, CancelledBySystem}`,
/// plus the direct `Pending -> Confirmed` and `Pending -> CancelledByUser` edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Pending,
    ConfirmationSent,
    Confirmed,
    CancelledByUser,
    CancelledBySystem,
}

impl MeetingStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [MeetingStatus; 5] = [
        MeetingStatus::Pending,
        MeetingStatus::ConfirmationSent,
        MeetingStatus::Confirmed,
        MeetingStatus::CancelledByUser,
        MeetingStatus::CancelledBySystem,
    ];

    /// Whether no further transition is defined from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MeetingStatus::Confirmed
                | MeetingStatus::CancelledByUser
                | MeetingStatus::CancelledBySystem
        )
    }

    /// Stable string form used in storage and API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::Pending => "pending",
            MeetingStatus::ConfirmationSent => "confirmation_sent",
            MeetingStatus::Confirmed => "confirmed",
            MeetingStatus::CancelledByUser => "cancelled_by_user",
            MeetingStatus::CancelledBySystem => "cancelled_by_system",
        }
    }
}

impl fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MeetingStatus {
    type Err = MeetConfirmError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MeetingStatus::Pending),
            "confirmation_sent" => Ok(MeetingStatus::ConfirmationSent),
            "confirmed" => Ok(MeetingStatus::Confirmed),
            "cancelled_by_user" => Ok(MeetingStatus::CancelledByUser),
            "cancelled_by_system" => Ok(MeetingStatus::CancelledBySystem),
            _ => Err(MeetConfirmError::InvalidValue {
                field: "status".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Action an attendee can take through a signed link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    Confirm,
    Cancel,
}

impl UserAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserAction::Confirm => "confirm",
            UserAction::Cancel => "cancel",
        }
    }

    /// Status the meeting moves to when this action is applied.
    pub fn target_status(&self) -> MeetingStatus {
        match self {
            UserAction::Confirm => MeetingStatus::Confirmed,
            UserAction::Cancel => MeetingStatus::CancelledByUser,
        }
    }
}

impl fmt::Display for UserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserAction {
    type Err = MeetConfirmError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirm" => Ok(UserAction::Confirm),
            "cancel" => Ok(UserAction::Cancel),
            _ => Err(MeetConfirmError::InvalidValue {
                field: "action".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Kind of deferred task scheduled for a meeting. At most one of each per meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "send-confirm")]
    SendConfirmation,
    #[serde(rename = "enforce")]
    EnforceDeadline,
}

impl TaskKind {
    pub const ALL: [TaskKind; 2] = [TaskKind::SendConfirmation, TaskKind::EnforceDeadline];

    /// URL-safe slug, also used as the task name prefix and callback path segment.
    pub fn slug(&self) -> &'static str {
        match self {
            TaskKind::SendConfirmation => "send-confirm",
            TaskKind::EnforceDeadline => "enforce",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = MeetConfirmError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send-confirm" => Ok(TaskKind::SendConfirmation),
            "enforce" => Ok(TaskKind::EnforceDeadline),
            _ => Err(MeetConfirmError::InvalidValue {
                field: "task_kind".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Kind of email recorded in the notification log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ConfirmRequest,
    CancelNotice,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ConfirmRequest => "confirm_request",
            NotificationKind::CancelNotice => "cancel_notice",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = MeetConfirmError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirm_request" => Ok(NotificationKind::ConfirmRequest),
            "cancel_notice" => Ok(NotificationKind::CancelNotice),
            _ => Err(MeetConfirmError::InvalidValue {
                field: "notification_kind".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

// =============================================================================
// Structs
// =============================================================================

/// A calendar event as reported by the calendar provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Provider-assigned event id.
    pub id: String,
    /// Event title (summary).
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// First attendee that is not the organizer, if any.
    pub attendee_email: Option<String>,
    pub organizer_email: Option<String>,
    /// Provider marked the event as cancelled.
    #[serde(default)]
    pub cancelled: bool,
    /// Link to the event in the provider's UI.
    #[serde(default)]
    pub html_link: Option<String>,
}

/// Offsets before a meeting's start at which the deferred tasks run.
///
/// Invariant: `send_offset > enforce_offset >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleOffsets {
    send_offset: Duration,
    enforce_offset: Duration,
}

impl LifecycleOffsets {
    pub fn new(send_offset: Duration, enforce_offset: Duration) -> Result<Self, MeetConfirmError> {
        if enforce_offset < Duration::zero() {
            return Err(MeetConfirmError::Config(
                "enforce offset must not be negative".to_string(),
            ));
        }
        if send_offset <= enforce_offset {
            return Err(MeetConfirmError::Config(format!(
                "send offset ({} min) must be greater than enforce offset ({} min)",
                send_offset.num_minutes(),
                enforce_offset.num_minutes()
            )));
        }
        Ok(Self {
            send_offset,
            enforce_offset,
        })
    }

    pub fn from_minutes(send_minutes: i64, enforce_minutes: i64) -> Result<Self, MeetConfirmError> {
        Self::new(
            Duration::minutes(send_minutes),
            Duration::minutes(enforce_minutes),
        )
    }

    pub fn send_offset(&self) -> Duration {
        self.send_offset
    }

    pub fn enforce_offset(&self) -> Duration {
        self.enforce_offset
    }

    pub fn confirm_send_at(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start - self.send_offset
    }

    pub fn enforce_at(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start - self.enforce_offset
    }
}

/// Durable lifecycle record for one tracked calendar booking.
///
/// Everything except `status` and `updated_at` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingRecord {
    pub meeting_id: String,
    pub status: MeetingStatus,
    pub title: String,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub confirm_send_at: DateTime<Utc>,
    pub enforce_at: DateTime<Utc>,
    pub attendee_ref: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MeetingRecord {
    /// Build a fresh `Pending` record from provider data.
    pub fn new(
        meeting_id: impl Into<String>,
        title: impl Into<String>,
        scheduled_start: DateTime<Utc>,
        scheduled_end: DateTime<Utc>,
        attendee_ref: impl Into<String>,
        offsets: &LifecycleOffsets,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            status: MeetingStatus::Pending,
            title: title.into(),
            scheduled_start,
            scheduled_end,
            confirm_send_at: offsets.confirm_send_at(scheduled_start),
            enforce_at: offsets.enforce_at(scheduled_start),
            attendee_ref: attendee_ref.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy of this record moved to `status`, stamped at `now`.
    pub fn with_status(&self, status: MeetingStatus, now: DateTime<Utc>) -> Self {
        Self {
            status,
            updated_at: now,
            ..self.clone()
        }
    }

    /// When the given deferred task should run.
    pub fn run_at(&self, kind: TaskKind) -> DateTime<Utc> {
        match kind {
            TaskKind::SendConfirmation => self.confirm_send_at,
            TaskKind::EnforceDeadline => self.enforce_at,
        }
    }
}
