//! Meeting status transitions.
//!
//! Pending -> ConfirmationSent -> Confirmed / CancelledByUser / CancelledBySystem
//! Pending -> Confirmed
//! Pending -> CancelledByUser

use meetconfirm_core::{MeetingStatus, UserAction};

use crate::error::TransitionError;

/// Validate that a status transition is allowed.
pub fn validate_transition(from: MeetingStatus, to: MeetingStatus) -> Result<(), TransitionError> {
    let valid = matches!(
        (from, to),
        (MeetingStatus::Pending, MeetingStatus::ConfirmationSent)
            | (MeetingStatus::Pending, MeetingStatus::Confirmed)
            | (MeetingStatus::Pending, MeetingStatus::CancelledByUser)
            | (MeetingStatus::ConfirmationSent, MeetingStatus::Confirmed)
            | (MeetingStatus::ConfirmationSent, MeetingStatus::CancelledByUser)
            | (MeetingStatus::ConfirmationSent, MeetingStatus::CancelledBySystem)
    );

    if valid {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

/// Whether `action` can still take effect on a meeting in `status`.
pub fn action_applies(status: MeetingStatus, action: UserAction) -> bool {
    validate_transition(status, action.target_status()).is_ok()
}
