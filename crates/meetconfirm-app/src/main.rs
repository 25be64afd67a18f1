//! MeetConfirm application binary - composition root.
//!
//! 1. Parse CLI args and load configuration from TOML
//! 2. Install the tracing subscriber
//! 3. Open SQLite storage and the secret stores
//! 4. Build the Google collaborators, scheduler backend and orchestrator
//! 5. Serve the HTTP API (and drain local tasks) until Ctrl-C

mod cli;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use meetconfirm_api::{routes, AppState};
use meetconfirm_core::config::SchedulerBackend;
use meetconfirm_core::MeetConfirmConfig;
use meetconfirm_engine::secrets::{CHANNEL_TOKEN, GOOGLE_CREDENTIALS, SIGNING_KEY, TASK_TOKEN};
use meetconfirm_engine::{
    ChangeDetector, Clock, DelayedTaskService, EnvSecretStore, FileSecretStore,
    LayeredSecretStore, LocalTaskQueue, Orchestrator, OrchestratorDeps, OrchestratorSettings,
    SchedulerClient, SecretStore, SystemClock, TaskRunner,
};
use meetconfirm_google::{
    CloudTasksService, CloudTasksSettings, GmailSender, GoogleCalendar, GoogleCredentials,
    OAuthTokenSource, TokenSource, GMAIL_API_BASE_URL,
};
use meetconfirm_storage::{Database, ScheduledTaskRepository, SqliteAuditLog, SqliteMeetingStore};

use cli::{expand_home, CliArgs, Command};

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// File-backed secrets take priority over environment variables.
fn build_secrets(config: &MeetConfirmConfig) -> LayeredSecretStore {
    let names = &config.secrets;

    let mut files = FileSecretStore::new();
    if let Some(path) = names.signing_key_file.as_deref() {
        files = files.with_file(SIGNING_KEY, expand_home(path));
    }
    if let Some(path) = names.google_credentials_file.as_deref() {
        files = files.with_file(GOOGLE_CREDENTIALS, expand_home(path));
    }

    let env = EnvSecretStore::new()
        .with_var(SIGNING_KEY, names.signing_key_env.clone())
        .with_var(TASK_TOKEN, names.task_token_env.clone())
        .with_var(CHANNEL_TOKEN, names.channel_token_env.clone())
        .with_var(GOOGLE_CREDENTIALS, names.google_credentials_env.clone());

    LayeredSecretStore::new(vec![Box::new(files), Box::new(env)])
}

fn build_scheduler(
    config: &MeetConfirmConfig,
    db: &Arc<Database>,
    http: &reqwest::Client,
    tokens: &Arc<dyn TokenSource>,
    secrets: &Arc<dyn SecretStore>,
    clock: &Arc<dyn Clock>,
) -> (Arc<dyn DelayedTaskService>, Option<Arc<LocalTaskQueue>>) {
    match config.scheduler.backend {
        SchedulerBackend::Local => {
            let queue = Arc::new(LocalTaskQueue::new(
                ScheduledTaskRepository::new(Arc::clone(db)),
                Arc::clone(clock),
            ));
            tracing::info!("Using local SQLite task queue");
            let service: Arc<dyn DelayedTaskService> = queue.clone();
            (service, Some(queue))
        }
        SchedulerBackend::CloudTasks => {
            let scheduler = &config.scheduler;
            let settings = CloudTasksSettings {
                api_base_url: scheduler.api_base_url.clone(),
                project_id: scheduler.project_id.clone(),
                location: scheduler.location.clone(),
                queue: scheduler.queue.clone(),
                service_url: config.service_base_url().to_string(),
                invoker_email: Some(scheduler.invoker_email.clone())
                    .filter(|email| !email.trim().is_empty()),
            };
            tracing::info!(queue = %settings.queue_path(), "Using Cloud Tasks queue");
            let service = CloudTasksService::new(
                http.clone(),
                Arc::clone(tokens),
                Arc::clone(secrets),
                settings,
            );
            (Arc::new(service), None)
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    if args.command() == Command::GenSecret {
        println!("{}", meetconfirm_api::auth::generate_token());
        return Ok(());
    }

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = MeetConfirmConfig::load_or_default(&config_file);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }
    config.general.port = args.resolve_port(config.general.port);

    init_tracing(&config.general.log_level, args.log_json);
    tracing::info!("Starting MeetConfirm v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    config.validate()?;
    let time_zone = config.general.time_zone()?;
    let offsets = config.timing.offsets()?;

    // Storage.
    let data_dir = expand_home(&config.general.data_dir);
    std::fs::create_dir_all(&data_dir).inspect_err(|e| {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
    })?;
    let db_path = data_dir.join("meetconfirm.db");
    let db = Arc::new(Database::new(&db_path)?);

    // Secrets and Google access.
    let secrets: Arc<dyn SecretStore> = Arc::new(build_secrets(&config));
    let http = meetconfirm_google::http_client()?;
    let credentials = GoogleCredentials::from_json(&secrets.get(GOOGLE_CREDENTIALS).await?)?;
    let tokens: Arc<dyn TokenSource> = Arc::new(OAuthTokenSource::new(http.clone(), credentials));

    let calendar = Arc::new(
        GoogleCalendar::new(
            http.clone(),
            Arc::clone(&tokens),
            &config.calendar.api_base_url,
            &config.calendar.calendar_id,
        )
        .with_max_results(config.calendar.max_results),
    );
    let watch_ttl = chrono::Duration::hours(i64::from(config.calendar.watch_ttl_hours));

    if args.command() == Command::SetupWatch {
        let channel_token = secrets.get_optional(CHANNEL_TOKEN).await?;
        let webhook_url = format!("{}/api/v1/webhook/calendar", config.service_base_url());
        let channel = calendar
            .watch(&webhook_url, channel_token.as_deref(), watch_ttl)
            .await?;
        tracing::info!(
            channel_id = %channel.id,
            webhook_url = %webhook_url,
            "Calendar watch registered"
        );
        println!("{}", serde_json::to_string_pretty(&channel)?);
        return Ok(());
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (task_service, local_queue) =
        build_scheduler(&config, &db, &http, &tokens, &secrets, &clock);

    let email = Arc::new(GmailSender::new(
        http.clone(),
        Arc::clone(&tokens),
        GMAIL_API_BASE_URL,
    ));
    let deps = OrchestratorDeps {
        store: Arc::new(SqliteMeetingStore::new(Arc::clone(&db))),
        audit: Arc::new(SqliteAuditLog::new(Arc::clone(&db))),
        scheduler: SchedulerClient::new(task_service),
        calendar: calendar.clone(),
        email,
        secrets: Arc::clone(&secrets),
        clock: Arc::clone(&clock),
    };
    let detector = ChangeDetector::new(
        &config.calendar.event_title_keyword,
        offsets,
        chrono::Duration::days(i64::from(config.calendar.lookahead_days)),
    );
    let orchestrator = Arc::new(Orchestrator::new(
        deps,
        detector,
        OrchestratorSettings::new(config.service_base_url(), time_zone),
    ));

    // Local task runner.
    let runner = local_queue.map(|queue| {
        Arc::new(TaskRunner::new(
            queue,
            Arc::clone(&orchestrator),
            Arc::clone(&clock),
            StdDuration::from_secs(config.scheduler.poll_interval_secs.max(1)),
            chrono::Duration::seconds(config.scheduler.retry_backoff_secs as i64),
        ))
    });
    let runner_handle = runner.as_ref().map(|runner| {
        let runner = Arc::clone(runner);
        tokio::spawn(async move { runner.run().await })
    });

    // API server.
    let state = AppState::new(orchestrator).with_calendar_watch(calendar, watch_ttl);
    let served = routes::start_server(
        &config.general.bind_address,
        config.general.port,
        state,
        shutdown_signal(),
    )
    .await;

    if let (Some(runner), Some(handle)) = (runner, runner_handle) {
        runner.shutdown();
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Task runner did not stop cleanly");
        }
    }

    served?;
    tracing::info!("MeetConfirm stopped");
    Ok(())
}
