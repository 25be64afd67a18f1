use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MeetConfirmError, Result};
use crate::types::LifecycleOffsets;

/// Top-level configuration for MeetConfirm.
///
/// Loaded from `~/.meetconfirm/config.toml` by default. Every section is
/// optional and falls back to its defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeetConfirmConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
}

impl MeetConfirmConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MeetConfirmConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.calendar.event_title_keyword.trim().is_empty() {
            return Err(MeetConfirmError::Config(
                "calendar.event_title_keyword must not be empty".to_string(),
            ));
        }
        if self.general.service_url.trim().is_empty() {
            return Err(MeetConfirmError::Config(
                "general.service_url must not be empty".to_string(),
            ));
        }
        if self.calendar.lookahead_days == 0 {
            return Err(MeetConfirmError::Config(
                "calendar.lookahead_days must be at least 1".to_string(),
            ));
        }
        if self.scheduler.backend == SchedulerBackend::CloudTasks {
            let cloud = &self.scheduler;
            for (field, value) in [
                ("scheduler.project_id", &cloud.project_id),
                ("scheduler.location", &cloud.location),
                ("scheduler.queue", &cloud.queue),
            ] {
                if value.trim().is_empty() {
                    return Err(MeetConfirmError::Config(format!(
                        "{} is required for the cloud_tasks backend",
                        field
                    )));
                }
            }
        }
        self.general.time_zone()?;
        self.timing.offsets()?;
        Ok(())
    }

    /// Public base URL with any trailing slash removed.
    pub fn service_base_url(&self) -> &str {
        self.general.service_url.trim_end_matches('/')
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Address the HTTP server binds to.
    pub bind_address: String,
    /// HTTP server port.
    pub port: u16,
    /// Public base URL, used for attendee links and scheduler callbacks.
    pub service_url: String,
    /// IANA time zone meeting times are shown in, e.g. "Europe/Warsaw".
    pub timezone: String,
}

impl GeneralConfig {
    /// The configured IANA time zone used to render meeting times in emails.
    pub fn time_zone(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| MeetConfirmError::InvalidValue {
                field: "general.timezone".to_string(),
                value: self.timezone.clone(),
            })
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.meetconfirm/data".to_string(),
            log_level: "info".to_string(),
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            service_url: "http://localhost:8080".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

/// Calendar watching and filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// Provider calendar id.
    pub calendar_id: String,
    /// Case-insensitive substring an event title must contain.
    pub event_title_keyword: String,
    /// How far ahead to look for upcoming events.
    pub lookahead_days: u32,
    /// Page size for event listing.
    pub max_results: u32,
    /// Base URL of the Calendar REST API.
    pub api_base_url: String,
    /// Lifetime requested for push channels, in hours.
    pub watch_ttl_hours: u32,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            calendar_id: "primary".to_string(),
            event_title_keyword: "Consultation".to_string(),
            lookahead_days: 14,
            max_results: 250,
            api_base_url: "https://www.googleapis.com/calendar/v3".to_string(),
            watch_ttl_hours: 24 * 7,
        }
    }
}

/// When the deferred tasks run relative to the meeting start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Minutes before start at which the confirmation email is sent.
    pub confirm_send_minutes: i64,
    /// Minutes before start at which an unconfirmed meeting is cancelled.
    pub enforce_deadline_minutes: i64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            confirm_send_minutes: 120,
            enforce_deadline_minutes: 60,
        }
    }
}

impl TimingConfig {
    pub fn offsets(&self) -> Result<LifecycleOffsets> {
        LifecycleOffsets::from_minutes(self.confirm_send_minutes, self.enforce_deadline_minutes)
    }
}

/// Which delayed-execution service backs the scheduler client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerBackend {
    /// SQLite task table drained by the in-process runner.
    Local,
    /// Google Cloud Tasks HTTP tasks calling back into the API.
    CloudTasks,
}

/// Delayed-task scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub backend: SchedulerBackend,
    /// Upper bound on how long the local runner sleeps between checks.
    pub poll_interval_secs: u64,
    /// Delay before the local runner redelivers a task that failed retryably.
    pub retry_backoff_secs: u64,
    /// Cloud Tasks project.
    pub project_id: String,
    /// Cloud Tasks location, e.g. "europe-west1".
    pub location: String,
    /// Cloud Tasks queue name.
    pub queue: String,
    /// Service account used for the OIDC token on task callbacks.
    pub invoker_email: String,
    /// Base URL of the Cloud Tasks REST API.
    pub api_base_url: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            backend: SchedulerBackend::Local,
            poll_interval_secs: 30,
            retry_backoff_secs: 60,
            project_id: String::new(),
            location: String::new(),
            queue: String::new(),
            invoker_email: String::new(),
            api_base_url: "https://cloudtasks.googleapis.com/v2".to_string(),
        }
    }
}

/// Where secrets are read from. Values never live in this file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Environment variable holding the token signing key.
    pub signing_key_env: String,
    /// File holding the token signing key; takes priority over the variable.
    pub signing_key_file: Option<String>,
    /// Environment variable holding the bearer token for task callbacks.
    pub task_token_env: String,
    /// Environment variable holding the push channel verification token.
    pub channel_token_env: String,
    /// Environment variable holding the Google OAuth credentials JSON.
    pub google_credentials_env: String,
    /// File holding the Google OAuth credentials JSON.
    pub google_credentials_file: Option<String>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            signing_key_env: "MEETCONFIRM_SIGNING_KEY".to_string(),
            signing_key_file: None,
            task_token_env: "MEETCONFIRM_TASK_TOKEN".to_string(),
            channel_token_env: "MEETCONFIRM_CHANNEL_TOKEN".to_string(),
            google_credentials_env: "GOOGLE_CREDENTIALS".to_string(),
            google_credentials_file: None,
        }
    }
}
