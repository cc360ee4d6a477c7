//! Configuration loading, validation, and management for Switchboard.
//!
//! Loads configuration from `~/.switchboard/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.switchboard/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Presence engine tuning
    #[serde(default)]
    pub presence: PresenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL. The file is created on first use.
    #[serde(default = "default_database_url")]
    pub url: String,
}

fn default_database_url() -> String {
    format!(
        "sqlite://{}",
        AppConfig::config_dir().join("switchboard.db").display()
    )
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8087
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Heartbeats older than this make the agent effectively offline.
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: i64,

    /// Default freshness horizon for the live location feed.
    #[serde(default = "default_location_stale_after_seconds")]
    pub location_stale_after_seconds: i64,

    /// Location pings older than this are pruned.
    #[serde(default = "default_location_retention_hours")]
    pub location_retention_hours: i64,

    /// Minimum gap between two prune sweeps in one process.
    #[serde(default = "default_prune_interval_minutes")]
    pub prune_interval_minutes: i64,
}

fn default_stale_after_minutes() -> i64 {
    5
}
fn default_location_stale_after_seconds() -> i64 {
    300
}
fn default_location_retention_hours() -> i64 {
    48
}
fn default_prune_interval_minutes() -> i64 {
    5
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            stale_after_minutes: default_stale_after_minutes(),
            location_stale_after_seconds: default_location_stale_after_seconds(),
            location_retention_hours: default_location_retention_hours(),
            prune_interval_minutes: default_prune_interval_minutes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.switchboard/config.toml).
    ///
    /// Environment variable overrides (highest priority):
    /// - `SWITCHBOARD_DATABASE_URL`
    /// - `SWITCHBOARD_HOST`
    /// - `SWITCHBOARD_PORT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(url) = std::env::var("SWITCHBOARD_DATABASE_URL") {
            config.database.url = url;
        }

        if let Ok(host) = std::env::var("SWITCHBOARD_HOST") {
            config.gateway.host = host;
        }

        if let Ok(port) = std::env::var("SWITCHBOARD_PORT") {
            config.gateway.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("SWITCHBOARD_PORT is not a port: {port}"))
            })?;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".switchboard")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.presence.stale_after_minutes <= 0 {
            return Err(ConfigError::ValidationError(
                "presence.stale_after_minutes must be positive".into(),
            ));
        }

        if self.presence.location_stale_after_seconds <= 0 {
            return Err(ConfigError::ValidationError(
                "presence.location_stale_after_seconds must be positive".into(),
            ));
        }

        if self.presence.location_retention_hours <= 0 {
            return Err(ConfigError::ValidationError(
                "presence.location_retention_hours must be positive".into(),
            ));
        }

        if self.presence.prune_interval_minutes < 0 {
            return Err(ConfigError::ValidationError(
                "presence.prune_interval_minutes must not be negative".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            gateway: GatewayConfig::default(),
            presence: PresenceConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
