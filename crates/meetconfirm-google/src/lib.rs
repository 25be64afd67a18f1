//! Google Calendar, Gmail and Cloud Tasks over REST.
//!
//! Each client implements one of the lifecycle engine's collaborator traits.
//! Base URLs are configurable so tests can point them at a local stub.

pub mod auth;
pub mod calendar;
pub mod cloud_tasks;
pub mod error;
pub mod gmail;

pub use auth::{GoogleCredentials, OAuthTokenSource, StaticTokenSource, TokenSource};
pub use calendar::{GoogleCalendar, WatchChannel};
pub use cloud_tasks::{CloudTasksService, CloudTasksSettings, TASK_TOKEN_HEADER};
pub use error::GoogleApiError;
pub use gmail::{render, GmailSender, RenderedEmail};

pub const GMAIL_API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// Shared HTTP client with a request timeout.
pub fn http_client() -> Result<reqwest::Client, GoogleApiError> {
    Ok(reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?)
}
