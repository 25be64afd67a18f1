//! HTML pages shown to attendees after they click a link.

use axum::http::StatusCode;
use axum::response::Html;

use meetconfirm_core::{MeetingStatus, UserAction};

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// A minimal standalone page.
pub fn page(status: StatusCode, title: &str, message: &str) -> (StatusCode, Html<String>) {
    let html = format!(
        "<!DOCTYPE html>\
         <html><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{title}</title>\
         <style>body{{font-family:sans-serif;max-width:32rem;margin:4rem auto;padding:0 1rem;color:#222}}</style>\
         </head><body><h1>{title}</h1><p>{message}</p></body></html>",
        title = escape(title),
        message = escape(message),
    );
    (status, Html(html))
}

pub fn applied(action: UserAction, meeting_title: &str) -> (StatusCode, Html<String>) {
    match action {
        UserAction::Confirm => page(
            StatusCode::OK,
            "Appointment confirmed",
            &format!("Thank you. {} is confirmed.", meeting_title),
        ),
        UserAction::Cancel => page(
            StatusCode::OK,
            "Appointment cancelled",
            &format!("{} has been cancelled.", meeting_title),
        ),
    }
}

/// The link was valid but the meeting had already moved on.
pub fn already_processed(status: MeetingStatus, meeting_title: &str) -> (StatusCode, Html<String>) {
    let message = match status {
        MeetingStatus::Confirmed => format!("{} is already confirmed.", meeting_title),
        MeetingStatus::CancelledByUser | MeetingStatus::CancelledBySystem => {
            format!("{} has already been cancelled.", meeting_title)
        }
        MeetingStatus::Pending | MeetingStatus::ConfirmationSent => {
            format!("Your response for {} has been recorded.", meeting_title)
        }
    };
    page(StatusCode::OK, "Already done", &message)
}

pub fn invalid_link() -> (StatusCode, Html<String>) {
    page(
        StatusCode::FORBIDDEN,
        "Link not valid",
        "This link could not be verified. Please use the link from your most recent email.",
    )
}

pub fn not_found() -> (StatusCode, Html<String>) {
    page(
        StatusCode::NOT_FOUND,
        "Appointment not found",
        "We could not find this appointment.",
    )
}

pub fn try_later() -> (StatusCode, Html<String>) {
    page(
        StatusCode::SERVICE_UNAVAILABLE,
        "Please try again",
        "We could not process your request right now. Please open the link again in a few minutes.",
    )
}

pub fn error() -> (StatusCode, Html<String>) {
    page(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Something went wrong",
        "We could not process your request.",
    )
}
