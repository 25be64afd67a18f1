//! Error types for the lifecycle engine.

use meetconfirm_core::{MeetingStatus, UserAction};
use meetconfirm_storage::StoreError;

/// A status change that the lifecycle graph does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid state transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: MeetingStatus,
    pub to: MeetingStatus,
}

/// Why a confirm/cancel link token was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),
    #[error("Token signature does not match")]
    BadSignature,
    #[error("Token carries unknown action: {0}")]
    UnknownAction(String),
    #[error("Token was issued for a different meeting")]
    MeetingMismatch,
    #[error("Token was issued for {issued}, not {attempted}")]
    ActionMismatch {
        issued: UserAction,
        attempted: UserAction,
    },
}

/// Errors from a secret store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretError {
    #[error("Secret not configured: {0}")]
    NotFound(String),
    #[error("Secret is empty: {0}")]
    Empty(String),
    /// The secret is configured but cannot be read, e.g. a file with bad
    /// permissions or bytes that are not UTF-8.
    #[error("Secret unreadable: {0}")]
    Unreadable(String),
    #[error("Secret store unavailable: {0}")]
    Unavailable(String),
}

impl SecretError {
    /// Only an unavailable backing store can recover without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(self, SecretError::Unavailable(_))
    }
}

/// Errors from the delayed-task scheduler client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler unavailable: {0}")]
    Unavailable(String),
    #[error("Scheduler rejected task {name}: {reason}")]
    Rejected { name: String, reason: String },
}

/// Errors from the calendar and email collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// Network failure, throttling or a server-side error. Worth retrying.
    #[error("{service} unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },
    /// The request itself was refused. Retrying will not help.
    #[error("{service} rejected request: {message}")]
    Rejected {
        service: &'static str,
        message: String,
    },
}

impl CollaboratorError {
    pub fn unavailable(service: &'static str, message: impl Into<String>) -> Self {
        CollaboratorError::Unavailable {
            service,
            message: message.into(),
        }
    }

    pub fn rejected(service: &'static str, message: impl Into<String>) -> Self {
        CollaboratorError::Rejected {
            service,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CollaboratorError::Unavailable { .. })
    }
}

/// Errors surfaced by the orchestrator's entry points.
///
/// Lost races and already-processed callbacks are not errors; they come back
/// as `Skipped`/`AlreadyProcessed` outcomes instead.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Unusable input from outside, such as an event with no attendee.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] TokenError),

    /// A change notification did not carry the expected channel token.
    #[error("Untrusted change notification")]
    UntrustedNotification,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),
}

impl OrchestratorError {
    /// Whether redelivering the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestratorError::MalformedInput(_)
            | OrchestratorError::InvalidToken(_)
            | OrchestratorError::UntrustedNotification => false,
            OrchestratorError::Store(e) => e.is_transient(),
            OrchestratorError::Scheduler(SchedulerError::Rejected { .. }) => false,
            OrchestratorError::Scheduler(SchedulerError::Unavailable(_)) => true,
            OrchestratorError::Collaborator(e) => e.is_retryable(),
            OrchestratorError::Secret(_) => true,
        }
    }
}
