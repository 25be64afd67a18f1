//! Router setup with all API routes and middleware.

use std::future::Future;

use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use meetconfirm_core::error::MeetConfirmError;

use crate::auth::require_task_token;
use crate::handlers;
use crate::rate_limit::{rate_limit, RateLimiter};
use crate::state::AppState;

/// Requests handled at once before callers queue.
const MAX_IN_FLIGHT: usize = 64;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // Calendar notifications carry no body; the channel token is checked by the orchestrator.
    let public_routes = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/webhook/calendar", post(handlers::webhook_calendar));

    let link_routes = Router::new()
        .route("/confirm", get(handlers::confirm))
        .route("/cancel", get(handlers::cancel))
        .layer(from_fn_with_state(
            RateLimiter::new(state.link_rate_limit),
            rate_limit,
        ));

    let protected_routes = Router::new()
        .route("/tasks/send-confirm/{meeting_id}", post(handlers::task_send_confirm))
        .route("/tasks/enforce/{meeting_id}", post(handlers::task_enforce))
        .route("/setup-calendar-watch", post(handlers::setup_calendar_watch))
        .route("/onboarding/run-test", post(handlers::run_onboarding_test))
        .route_layer(from_fn_with_state(state.clone(), require_task_token));

    let api = public_routes.merge(link_routes).merge(protected_routes);

    Router::new()
        .route("/", get(handlers::root))
        .nest("/api/v1", api)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(MAX_IN_FLIGHT))
        .with_state(state)
}

/// Serve the API on `bind:port` until `shutdown` resolves.
pub async fn start_server<F>(
    bind: &str,
    port: u16,
    state: AppState,
    shutdown: F,
) -> Result<(), MeetConfirmError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", bind, port);
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| MeetConfirmError::Api(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| MeetConfirmError::Api(format!("Server error: {}", e)))?;

    tracing::info!("API server stopped");
    Ok(())
}
