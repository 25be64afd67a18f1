//! Shared domain types, configuration, and errors for MeetConfirm.

pub mod config;
pub mod error;
pub mod types;

pub use config::MeetConfirmConfig;
pub use error::{MeetConfirmError, Result};
pub use types::*;
