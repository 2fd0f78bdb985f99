//! Configuration management for the TermGate daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/termgate/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::probe::ProbePolicy;
use crate::session::{RetryPolicy, SessionDefaults};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind_addr is not a valid socket address: {0}")]
    InvalidBindAddr(String),

    #[error("max_attempts must be between 1 and 10, got {0}")]
    InvalidMaxAttempts(u32),

    #[error("retry_delay_ms must be between 100 and 10000, got {0}")]
    InvalidRetryDelay(u64),

    #[error("connect_timeout_secs must be between 1 and 300, got {0}")]
    InvalidConnectTimeout(u64),

    #[error("keepalive_interval_secs must be between 1 and 600, got {0}")]
    InvalidKeepaliveInterval(u32),

    #[error("probe interval_ms must be between 100 and 5000, got {0}")]
    InvalidProbeInterval(u64),

    #[error("probe deadline_secs must be between 1 and 120, got {0}")]
    InvalidProbeDeadline(u64),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the TermGate daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Network-related configuration.
    pub network: NetworkConfig,

    /// SSH connection configuration.
    pub ssh: SshConfig,

    /// Connect retry configuration.
    pub retry: RetryConfig,

    /// Container readiness probe configuration.
    pub probe: ProbeConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Network configuration for the WebSocket listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the relay listens on.
    pub bind_addr: String,
}

/// SSH connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SshConfig {
    /// Username when a connect request omits one.
    pub default_username: String,

    /// Password when a connect request omits one.
    pub default_password: Option<String>,

    /// Per-attempt connection timeout in seconds.
    pub connect_timeout_secs: u64,

    /// SSH keepalive interval in seconds.
    pub keepalive_interval_secs: u32,
}

/// Connect retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempt budget per connect, including the first attempt.
    pub max_attempts: u32,

    /// Fixed delay between attempts in milliseconds.
    pub delay_ms: u64,
}

/// Container readiness probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Delay between probe attempts in milliseconds.
    pub interval_ms: u64,

    /// Total probe budget in seconds.
    pub deadline_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9170".to_string(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            default_username: "root".to_string(),
            default_password: None,
            connect_timeout_secs: 20,
            keepalive_interval_secs: 10,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 1000,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            deadline_secs: 10,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("termgate")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - TERMGATE_BIND_ADDR: Override the relay listen address
    /// - TERMGATE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("TERMGATE_BIND_ADDR") {
            if !addr.is_empty() {
                tracing::info!("Overriding bind_addr from environment: {}", addr);
                self.network.bind_addr = addr;
            }
        }

        if let Ok(level) = std::env::var("TERMGATE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddr(self.network.bind_addr.clone()));
        }

        if self.retry.max_attempts < 1 || self.retry.max_attempts > 10 {
            return Err(ConfigError::InvalidMaxAttempts(self.retry.max_attempts));
        }

        if self.retry.delay_ms < 100 || self.retry.delay_ms > 10_000 {
            return Err(ConfigError::InvalidRetryDelay(self.retry.delay_ms));
        }

        if self.ssh.connect_timeout_secs < 1 || self.ssh.connect_timeout_secs > 300 {
            return Err(ConfigError::InvalidConnectTimeout(
                self.ssh.connect_timeout_secs,
            ));
        }

        if self.ssh.keepalive_interval_secs < 1 || self.ssh.keepalive_interval_secs > 600 {
            return Err(ConfigError::InvalidKeepaliveInterval(
                self.ssh.keepalive_interval_secs,
            ));
        }

        if self.probe.interval_ms < 100 || self.probe.interval_ms > 5000 {
            return Err(ConfigError::InvalidProbeInterval(self.probe.interval_ms));
        }

        if self.probe.deadline_secs < 1 || self.probe.deadline_secs > 120 {
            return Err(ConfigError::InvalidProbeDeadline(self.probe.deadline_secs));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// The validated listen address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.network
            .bind_addr
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.network.bind_addr))
    }

    /// Retry policy derived from the retry and ssh sections.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            delay: Duration::from_millis(self.retry.delay_ms),
            connect_timeout: Duration::from_secs(self.ssh.connect_timeout_secs),
        }
    }

    /// Probe policy derived from the probe section.
    pub fn probe_policy(&self) -> ProbePolicy {
        ProbePolicy {
            interval: Duration::from_millis(self.probe.interval_ms),
            deadline: Duration::from_secs(self.probe.deadline_secs),
        }
    }

    /// Session credential defaults derived from the ssh section.
    pub fn session_defaults(&self) -> SessionDefaults {
        SessionDefaults {
            username: self.ssh.default_username.clone(),
            password: self.ssh.default_password.clone(),
        }
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
    ///
    /// The default path is `~/.config/termgate/config.toml`.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
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

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
