//! Configuration management for the cmdbridge daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/cmdbridge/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::Timing;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("address must be a socket address such as 127.0.0.1:8080, got {0}")]
    InvalidAddress(String),

    #[error("path must start with '/', got {0:?}")]
    InvalidPath(String),

    #[error("invalid bridge timing: {0}")]
    InvalidTiming(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the cmdbridge daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Upgrade listener configuration.
    pub server: ServerConfig,

    /// Per-session timing and limits.
    pub bridge: BridgeConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Upgrade listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address of the upgrade endpoint.
    pub address: String,

    /// Request path that is upgraded; every other path gets 404.
    pub path: String,
}

/// Per-session timing and limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Largest inbound message in bytes.
    pub max_message_size: usize,

    /// Deadline for writing one frame, in seconds.
    pub write_wait_secs: u64,

    /// Read deadline refreshed by every pong, in seconds.
    /// Pings are sent every 9/10 of this.
    pub pong_wait_secs: u64,

    /// How long to wait after SIGINT before SIGKILL, in milliseconds.
    pub kill_grace_millis: u64,

    /// Linger after the normal-closure frame, in seconds.
    pub close_grace_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            path: "/ws".to_string(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_message_size: protocol::MAX_MESSAGE_SIZE,
            write_wait_secs: protocol::WRITE_WAIT.as_secs(),
            pong_wait_secs: protocol::PONG_WAIT.as_secs(),
            kill_grace_millis: protocol::KILL_GRACE.as_millis() as u64,
            close_grace_secs: protocol::CLOSE_GRACE.as_secs(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cmdbridge")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - CMDBRIDGE_ADDRESS: Override the listen address
    /// - CMDBRIDGE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(address) = std::env::var("CMDBRIDGE_ADDRESS") {
            if !address.is_empty() {
                tracing::info!("Overriding address from environment: {}", address);
                self.server.address = address;
            }
        }

        if let Ok(level) = std::env::var("CMDBRIDGE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        if self.server.address.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidAddress(self.server.address.clone()));
        }

        if !self.server.path.starts_with('/') {
            return Err(ConfigError::InvalidPath(self.server.path.clone()));
        }

        self.timing()
            .validate()
            .map_err(|e| ConfigError::InvalidTiming(e.to_string()))?;

        Ok(())
    }

    /// Builds the session timing from the `[bridge]` section.
    pub fn timing(&self) -> Timing {
        let bridge = &self.bridge;
        let mut timing = Timing::default()
            .with_pong_wait(Duration::from_secs(bridge.pong_wait_secs))
            .with_write_wait(Duration::from_secs(bridge.write_wait_secs))
            .with_kill_grace(Duration::from_millis(bridge.kill_grace_millis))
            .with_close_grace(Duration::from_secs(bridge.close_grace_secs));
        timing.max_message_size = bridge.max_message_size;
        timing
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
