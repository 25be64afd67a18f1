//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Duration;

use meetconfirm_engine::{Orchestrator, SecretStore};
use meetconfirm_google::{GoogleApiError, GoogleCalendar, WatchChannel};

/// Registers the calendar push channel.
#[async_trait]
pub trait CalendarWatch: Send + Sync {
    async fn watch(
        &self,
        webhook_url: &str,
        channel_token: Option<&str>,
        ttl: Duration,
    ) -> Result<WatchChannel, GoogleApiError>;
}

#[async_trait]
impl CalendarWatch for GoogleCalendar {
    async fn watch(
        &self,
        webhook_url: &str,
        channel_token: Option<&str>,
        ttl: Duration,
    ) -> Result<WatchChannel, GoogleApiError> {
        GoogleCalendar::watch(self, webhook_url, channel_token, ttl).await
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub secrets: Arc<dyn SecretStore>,
    /// `None` when no Google calendar is wired (local/dev runs).
    pub calendar_watch: Option<Arc<dyn CalendarWatch>>,
    pub watch_ttl: Duration,
    /// Requests per second allowed on the confirm/cancel links.
    pub link_rate_limit: u64,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let secrets = orchestrator.secrets().clone();
        Self {
            orchestrator,
            secrets,
            calendar_watch: None,
            watch_ttl: Duration::hours(168),
            link_rate_limit: 20,
            start_time: Instant::now(),
        }
    }

    pub fn with_calendar_watch(mut self, watch: Arc<dyn CalendarWatch>, ttl: Duration) -> Self {
        self.calendar_watch = Some(watch);
        self.watch_ttl = ttl;
        self
    }

    /// Public URL the calendar provider posts change notifications to.
    pub fn webhook_url(&self) -> String {
        format!(
            "{}/api/v1/webhook/calendar",
            self.orchestrator.settings().service_url
        )
    }
}
