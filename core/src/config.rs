//! Relay configuration.
//!
//! Loaded from a YAML file; every field has a default so an absent or
//! partial file is valid. `IMGRELAY_*` environment variables override
//! individual values.

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Private-image probe settings
    pub probe: ProbeConfig,

    /// Image push settings
    pub push: PushConfig,

    /// Registry authentication settings
    pub auth: AuthConfig,

    /// Ephemeral air-gap registry settings
    pub temp_registry: TempRegistryConfig,

    /// Registries spoken to over plain HTTP
    pub insecure_registries: Vec<String>,

    /// Log level
    pub log_level: LogLevel,
}

impl RelayConfig {
    /// Load configuration from a YAML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: RelayConfig = serde_yaml::from_str(&data).map_err(|e| {
            RelayError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `IMGRELAY_*` environment overrides.
    pub fn from_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = env_parse::<usize>("IMGRELAY_PROBE_CONCURRENCY")? {
            self.probe.concurrency = v;
        }
        if let Some(v) = env_parse::<u32>("IMGRELAY_PUSH_ATTEMPTS")? {
            self.push.attempts = v;
        }
        if let Some(v) = env_parse::<u64>("IMGRELAY_PUSH_BACKOFF_SECS")? {
            self.push.backoff_secs = v;
        }
        if let Ok(v) = std::env::var("IMGRELAY_REGISTRY_BINARY") {
            self.temp_registry.binary = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("IMGRELAY_INSECURE_REGISTRIES") {
            self.insecure_registries = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.probe.concurrency == 0 {
            return Err(RelayError::Config(
                "probe.concurrency must be at least 1".to_string(),
            ));
        }
        if self.probe.eof_attempts == 0 {
            return Err(RelayError::Config(
                "probe.eof_attempts must be at least 1".to_string(),
            ));
        }
        if self.push.attempts == 0 {
            return Err(RelayError::Config(
                "push.attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| RelayError::Config(format!("Invalid value for {}: '{}'", key, v))),
        Err(_) => Ok(None),
    }
}

/// Private-image probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Maximum in-flight classifications
    pub concurrency: usize,

    /// Attempts made when the registry hangs up with EOF
    pub eof_attempts: u32,

    /// Delay between EOF attempts
    pub eof_backoff_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            eof_attempts: 3,
            eof_backoff_secs: 1,
        }
    }
}

/// Image push configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Attempts per image before giving up
    pub attempts: u32,

    /// Delay between failed attempts
    pub backoff_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff_secs: 10,
        }
    }
}

/// Registry authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HTTP client timeout for auth pings and token requests
    pub timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// Ephemeral registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TempRegistryConfig {
    /// Registry server executable
    pub binary: PathBuf,

    /// How long to wait for the server to answer
    pub ready_timeout_secs: u64,
}

impl Default for TempRegistryConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("registry"),
            ready_timeout_secs: 30,
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}
