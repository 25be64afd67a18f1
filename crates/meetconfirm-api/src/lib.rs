//! HTTP surface of the meeting confirmation service.
//!
//! Receives calendar change notifications, scheduler callbacks and the
//! attendee confirm/cancel links, and hands each to the orchestrator.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod pages;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::{AppState, CalendarWatch};
