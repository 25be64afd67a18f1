//! Secret lookup.
//!
//! Secrets are addressed by logical name (see the `SIGNING_KEY` family of
//! constants). Values are read on every call so a rotated secret is picked up
//! by the next request without a restart.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::SecretError;

/// HMAC key for confirm/cancel link tokens.
pub const SIGNING_KEY: &str = "signing-key";
/// Bearer token expected on scheduler callbacks and admin endpoints.
pub const TASK_TOKEN: &str = "task-token";
/// Token the calendar provider echoes on push notifications.
pub const CHANNEL_TOKEN: &str = "channel-token";
/// OAuth client credentials and refresh token, as JSON.
pub const GOOGLE_CREDENTIALS: &str = "google-credentials";

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a secret. Missing and blank secrets are errors.
    async fn get(&self, name: &str) -> Result<String, SecretError>;

    /// Like `get`, but a secret that is not configured at all yields `None`.
    async fn get_optional(&self, name: &str) -> Result<Option<String>, SecretError> {
        match self.get(name).await {
            Ok(value) => Ok(Some(value)),
            Err(SecretError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn non_empty(name: &str, raw: &str) -> Result<String, SecretError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(SecretError::Empty(name.to_string()));
    }
    Ok(value.to_string())
}

/// Secrets held in memory.
#[derive(Debug, Default, Clone)]
pub struct StaticSecretStore {
    values: HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get(&self, name: &str) -> Result<String, SecretError> {
        let raw = self
            .values
            .get(name)
            .ok_or_else(|| SecretError::NotFound(name.to_string()))?;
        non_empty(name, raw)
    }
}

/// Secrets read from environment variables.
#[derive(Debug, Default, Clone)]
pub struct EnvSecretStore {
    vars: HashMap<String, String>,
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map logical secret `name` to environment variable `var`.
    pub fn with_var(mut self, name: &str, var: impl Into<String>) -> Self {
        self.vars.insert(name.to_string(), var.into());
        self
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get(&self, name: &str) -> Result<String, SecretError> {
        let var = self
            .vars
            .get(name)
            .ok_or_else(|| SecretError::NotFound(name.to_string()))?;
        match std::env::var(var) {
            Ok(raw) => non_empty(name, &raw),
            Err(std::env::VarError::NotPresent) => Err(SecretError::NotFound(name.to_string())),
            Err(e) => Err(SecretError::Unreadable(format!("{}: {}", var, e))),
        }
    }
}

/// Secrets read from files, e.g. mounted secret volumes.
#[derive(Debug, Default, Clone)]
pub struct FileSecretStore {
    files: HashMap<String, PathBuf>,
}

impl FileSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.files.insert(name.to_string(), path.into());
        self
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, name: &str) -> Result<String, SecretError> {
        let path = self
            .files
            .get(name)
            .ok_or_else(|| SecretError::NotFound(name.to_string()))?;
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => non_empty(name, &raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SecretError::NotFound(name.to_string()))
            }
            Err(e) => {
                let detail = format!("{}: {}", path.display(), e);
                match e.kind() {
                    std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::InvalidData => {
                        Err(SecretError::Unreadable(detail))
                    }
                    _ => Err(SecretError::Unavailable(detail)),
                }
            }
        }
    }
}

/// Tries each store in order and returns the first configured secret.
pub struct LayeredSecretStore {
    layers: Vec<Box<dyn SecretStore>>,
}

impl LayeredSecretStore {
    pub fn new(layers: Vec<Box<dyn SecretStore>>) -> Self {
        Self { layers }
    }
}

#[async_trait]
impl SecretStore for LayeredSecretStore {
    async fn get(&self, name: &str) -> Result<String, SecretError> {
        for layer in &self.layers {
            match layer.get(name).await {
                Err(SecretError::NotFound(_)) => continue,
                other => return other,
            }
        }
        Err(SecretError::NotFound(name.to_string()))
    }
}
