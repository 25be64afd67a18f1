use thiserror::Error;

use meetconfirm_core::{MeetConfirmError, MeetingStatus};

/// Errors returned by the meeting store, audit log and task table.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record's current status did not match the expected one.
    /// Callers treat this as "someone else already moved it".
    #[error("meeting {meeting_id} is {actual}, expected {expected}")]
    StatusMismatch {
        meeting_id: String,
        expected: MeetingStatus,
        actual: MeetingStatus,
    },

    #[error("meeting {0} not found")]
    NotFound(String),

    /// The backing store could not be reached or failed mid-operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded into a domain value.
    #[error("corrupt row for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// The caller passed arguments that contradict each other.
    #[error("invalid store request: {0}")]
    InvalidRequest(String),
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<MeetConfirmError> for StoreError {
    fn from(err: MeetConfirmError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<StoreError> for MeetConfirmError {
    fn from(err: StoreError) -> Self {
        MeetConfirmError::Storage(err.to_string())
    }
}
