//! Configuration management for the Driveport gateway.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/driveport/config.toml`.
//! A loaded configuration is validated once and then shared read-only.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default backend port.
pub const DEFAULT_BACKEND_PORT: u16 = 42069;

/// Default per-step deadline for backend exchanges, in seconds.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 5;

/// Largest accepted timeout, in seconds.
const MAX_TIMEOUT_SECS: u64 = 300;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be non-zero")]
    InvalidPort { field: &'static str },

    #[error("{field} must be between 1 and 300 seconds, got {value}")]
    InvalidTimeout { field: &'static str, value: u64 },

    #[error("tls_cert and tls_key must be set together")]
    IncompleteTls,

    #[error("backend host must not be empty")]
    EmptyBackendHost,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Browser-facing listener.
    pub server: ServerConfig,

    /// Backend file server connection.
    pub backend: BackendConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Browser-facing HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub host: String,

    /// Port to bind.
    pub port: u16,

    /// PEM certificate chain. Without a certificate and key the gateway serves plain HTTP.
    pub tls_cert: Option<PathBuf>,

    /// PEM private key.
    pub tls_key: Option<PathBuf>,
}

/// Backend connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend host name or address.
    pub host: String,

    /// Backend port.
    pub port: u16,

    /// Wrap backend connections in TLS.
    pub tls: bool,

    /// Accept any backend certificate.
    pub insecure_skip_verify: bool,

    /// Extra PEM CA bundle trusted for the backend certificate.
    pub ca_file: Option<PathBuf>,

    /// Deadline for each individual step of an exchange.
    pub step_timeout_secs: u64,

    /// Deadline the backend is asked to apply to each command.
    pub request_timeout_secs: u64,

    /// Idle connections kept for reuse. 0 opens a fresh connection per request.
    pub pool_max_idle: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8443,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_BACKEND_PORT,
            tls: true,
            insecure_skip_verify: false,
            ca_file: None,
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
            pool_max_idle: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// `host:port` as shown on the drive list page and used for binding.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Certificate and key, when both are configured.
    pub fn tls_pair(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }
}

impl BackendConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("driveport")
        .join("config.toml")
}

impl GatewayConfig {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - DRIVEPORT_BACKEND_HOST: Override backend host
    /// - DRIVEPORT_BACKEND_PORT: Override backend port
    /// - DRIVEPORT_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Some(host) = non_empty_env("DRIVEPORT_BACKEND_HOST") {
            tracing::info!(host = %host, "Overriding backend host from environment");
            self.backend.host = host;
        }

        if let Some(port) = non_empty_env("DRIVEPORT_BACKEND_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    tracing::info!(port, "Overriding backend port from environment");
                    self.backend.port = port;
                }
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid DRIVEPORT_BACKEND_PORT"),
            }
        }

        if let Some(level) = non_empty_env("DRIVEPORT_LOG_LEVEL") {
            tracing::info!(level = %level, "Overriding log_level from environment");
            self.logging.log_level = level;
        }
    }

    /// Level the subscriber starts with, before [`Self::apply_env_overrides`] runs.
    ///
    /// `--verbose` wins, then `DRIVEPORT_LOG_LEVEL`, then the file's level.
    pub fn startup_log_level(&self, verbose: bool) -> String {
        if verbose {
            return "debug".to_string();
        }
        non_empty_env("DRIVEPORT_LOG_LEVEL").unwrap_or_else(|| self.logging.log_level.clone())
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort {
                field: "server.port",
            });
        }
        if self.backend.port == 0 {
            return Err(ConfigError::InvalidPort {
                field: "backend.port",
            });
        }
        if self.backend.host.trim().is_empty() {
            return Err(ConfigError::EmptyBackendHost);
        }

        for (field, value) in [
            ("backend.step_timeout_secs", self.backend.step_timeout_secs),
            (
                "backend.request_timeout_secs",
                self.backend.request_timeout_secs,
            ),
        ] {
            if !(1..=MAX_TIMEOUT_SECS).contains(&value) {
                return Err(ConfigError::InvalidTimeout { field, value });
            }
        }

        if self.server.tls_cert.is_some() != self.server.tls_key.is_some() {
            return Err(ConfigError::IncompleteTls);
        }

        let level = self.logging.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(
                self.logging.log_level.clone(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
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

        fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
