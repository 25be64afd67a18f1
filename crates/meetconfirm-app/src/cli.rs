//! CLI argument definitions for the MeetConfirm service.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// MeetConfirm: asks attendees to confirm upcoming meetings and cancels the
/// ones nobody confirms.
#[derive(Parser, Debug)]
#[command(name = "meetconfirm", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", env = "MEETCONFIRM_CONFIG")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port", env = "MEETCONFIRM_PORT")]
    pub port: Option<u16>,

    /// Data directory for the SQLite database.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long = "log-json")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Register the calendar push channel and exit.
    SetupWatch,
    /// Print a random secret suitable for the signing key or task token.
    GenSecret,
}

impl CliArgs {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }

    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag / MEETCONFIRM_CONFIG > ~/.meetconfirm/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        match self.config {
            Some(ref p) => p.clone(),
            None => default_config_path(),
        }
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag / MEETCONFIRM_PORT > config file value > 8080.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if config_port != 0 {
            return config_port;
        }
        8080
    }

    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

fn default_config_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".meetconfirm").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
