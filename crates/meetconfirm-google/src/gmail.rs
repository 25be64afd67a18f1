//! Gmail API v1 sender for the lifecycle emails.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use meetconfirm_engine::{CollaboratorError, EmailMessage, EmailSender, EmailTemplate};

use crate::auth::TokenSource;
use crate::error::{check_status, GoogleApiError};

const SERVICE: &str = "email";

/// A rendered email ready for MIME encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render one of the lifecycle templates.
pub fn render(message: &EmailMessage) -> RenderedEmail {
    let title = message.get("meeting_title");
    let when = format!(
        "{} to {} ({})",
        escape_html(message.get("meeting_start")),
        escape_html(message.get("meeting_end")),
        escape_html(message.get("timezone"))
    );

    let (subject, body) = match message.template {
        EmailTemplate::ConfirmationRequest => (
            format!("Please confirm: {}", title),
            format!(
                "<p>Your appointment <strong>{title}</strong> is scheduled for {when}.</p>\
                 <p>Please let us know whether you can attend.</p>\
                 <p><a href=\"{confirm}\">Confirm appointment</a></p>\
                 <p><a href=\"{cancel}\">Cancel appointment</a></p>\
                 <p>If we do not hear from you, the appointment will be cancelled automatically.</p>",
                title = escape_html(title),
                when = when,
                confirm = escape_html(message.get("confirm_url")),
                cancel = escape_html(message.get("cancel_url")),
            ),
        ),
        EmailTemplate::OnboardingWelcome => (
            "Welcome to MeetConfirm!".to_string(),
            format!(
                "<p>MeetConfirm is connected to this mailbox and your calendar.</p>\
                 <p>A test event titled <strong>{keyword} - Test Event</strong> has been added \
                 to your calendar. You will shortly receive the confirmation request for it, \
                 exactly as your attendees will.</p>\
                 <p>Events whose title contains <strong>{keyword}</strong> are tracked from now on.</p>",
                keyword = escape_html(message.get("event_title_keyword")),
            ),
        ),
        EmailTemplate::CancellationNotice => {
            let reason = if message.get("cancelled_by") == "user" {
                "as you requested"
            } else {
                "because it was not confirmed in time"
            };
            (
                format!("Appointment cancelled: {}", title),
                format!(
                    "<p>Your appointment <strong>{title}</strong> on {when} has been cancelled {reason}.</p>",
                    title = escape_html(title),
                    when = when,
                    reason = reason,
                ),
            )
        }
    };

    RenderedEmail {
        to: message.recipient.clone(),
        subject,
        html: format!("<!DOCTYPE html><html><body>{}</body></html>", body),
    }
}

/// RFC 2047 encoding for non-ASCII header values.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

impl RenderedEmail {
    /// RFC 822 message, base64url-encoded as Gmail's `raw` field expects.
    pub fn to_raw(&self, from: Option<&str>) -> String {
        let mut mime = String::new();
        if let Some(from) = from {
            mime.push_str(&format!("From: {}\r\n", from));
        }
        mime.push_str(&format!("To: {}\r\n", self.to));
        mime.push_str(&format!("Subject: {}\r\n", encode_header(&self.subject)));
        mime.push_str("MIME-Version: 1.0\r\n");
        mime.push_str("Content-Type: text/html; charset=\"UTF-8\"\r\n");
        mime.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        mime.push_str(&STANDARD.encode(self.html.as_bytes()));
        mime.push_str("\r\n");
        URL_SAFE.encode(mime.as_bytes())
    }
}

pub struct GmailSender {
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    base_url: String,
    from: Option<String>,
}

impl GmailSender {
    pub fn new(http: reqwest::Client, tokens: Arc<dyn TokenSource>, base_url: &str) -> Self {
        Self {
            http,
            tokens,
            base_url: base_url.trim_end_matches('/').to_string(),
            from: None,
        }
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    async fn deliver(&self, message: &EmailMessage) -> Result<(), GoogleApiError> {
        let rendered = render(message);
        let raw = rendered.to_raw(self.from.as_deref());
        let response = self
            .http
            .post(format!("{}/users/me/messages/send", self.base_url))
            .bearer_auth(self.tokens.access_token().await?)
            .json(&json!({ "raw": raw }))
            .send()
            .await?;
        check_status(response).await?;
        info!(template = %message.template, recipient = %message.recipient, "Email sent");
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    #[serde(default)]
    email_address: String,
}

impl GmailSender {
    /// The configured `From` address, or the authorized mailbox's own.
    async fn mailbox_address(&self) -> Result<String, GoogleApiError> {
        if let Some(from) = self.from.as_deref() {
            return Ok(from.to_string());
        }
        let response = self
            .http
            .get(format!("{}/users/me/profile", self.base_url))
            .bearer_auth(self.tokens.access_token().await?)
            .send()
            .await?;
        let profile: ProfileResponse = check_status(response).await?.json().await?;
        if profile.email_address.trim().is_empty() {
            return Err(GoogleApiError::UnexpectedResponse(
                "profile has no email address".to_string(),
            ));
        }
        Ok(profile.email_address)
    }
}

#[async_trait]
impl EmailSender for GmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), CollaboratorError> {
        match self.deliver(message).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.status() == Some(401) {
                    self.tokens.invalidate().await;
                }
                Err(e.into_collaborator(SERVICE))
            }
        }
    }

    async fn sender_address(&self) -> Result<String, CollaboratorError> {
        match self.mailbox_address().await {
            Ok(address) => Ok(address),
            Err(e) => {
                if e.status() == Some(401) {
                    self.tokens.invalidate().await;
                }
                Err(e.into_collaborator(SERVICE))
            }
        }
    }
}
