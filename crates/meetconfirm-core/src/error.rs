use thiserror::Error;

/// Top-level error type for MeetConfirm.
///
/// Subsystem crates define their own error types and convert into this one
/// at crate boundaries where a single error type is convenient (startup,
/// configuration, storage plumbing).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MeetConfirmError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Calendar error: {0}")]
    Calendar(String),

    #[error("Email error: {0}")]
    Email(String),

    #[error("Secret store error: {0}")]
    Secret(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

impl From<toml::de::Error> for MeetConfirmError {
    fn from(err: toml::de::Error) -> Self {
        MeetConfirmError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for MeetConfirmError {
    fn from(err: toml::ser::Error) -> Self {
        MeetConfirmError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for MeetConfirmError {
    fn from(err: serde_json::Error) -> Self {
        MeetConfirmError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for MeetConfirm operations.
pub type Result<T> = std::result::Result<T, MeetConfirmError>;
