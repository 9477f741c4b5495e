//! Configuration management module.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration load result.
#[derive(Debug)]
pub enum ConfigLoadResult {
    /// Config loaded successfully.
    Loaded(AppConfig),
    /// Config file missing (first run).
    Missing,
    /// Config file exists but invalid.
    Invalid(ConfigError),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub device: DeviceConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// Heat pump endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub host: String,
    /// UDP control port (default: 1194).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Device serial number from the nameplate.
    pub serial: u64,
    pub password: String,
}

/// Timeout and retry tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Receive timeout per datagram, seconds (default: 3).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Datagram sends per request before giving up (default: 2).
    #[serde(default = "default_transport_tries")]
    pub transport_tries: u32,
    /// Full connect-act cycles before an operation reports offline
    /// (default: 10).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_port() -> u16 {
    1194
}

fn default_timeout_secs() -> u64 {
    3
}

fn default_transport_tries() -> u32 {
    2
}

fn default_max_attempts() -> u32 {
    10
}

impl AppConfig {
    /// Get config file path (same directory as executable).
    pub fn default_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Attempt to load config with detailed result.
    pub fn try_load(path: &Path) -> ConfigLoadResult {
        if !path.exists() {
            return ConfigLoadResult::Missing;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<AppConfig>(&content) {
                Ok(config) => match config.validate() {
                    Ok(()) => ConfigLoadResult::Loaded(config),
                    Err(e) => ConfigLoadResult::Invalid(e),
                },
                Err(e) => ConfigLoadResult::Invalid(ConfigError::Parse(e)),
            },
            Err(e) => ConfigLoadResult::Invalid(ConfigError::Read(e)),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.host.trim().is_empty() {
            return Err(ConfigError::Validation("Device host cannot be empty".to_string()));
        }
        if self.device.port == 0 {
            return Err(ConfigError::Validation(
                "Device port must be greater than 0".to_string(),
            ));
        }
        if self.device.serial == 0 {
            return Err(ConfigError::Validation(
                "Device serial number cannot be 0".to_string(),
            ));
        }
        if self.device.password.is_empty() {
            return Err(ConfigError::Validation(
                "Device password cannot be empty".to_string(),
            ));
        }
        if self.protocol.timeout_secs == 0 || self.protocol.timeout_secs > 30 {
            return Err(ConfigError::Validation(
                "Timeout must be between 1 and 30 seconds".to_string(),
            ));
        }
        if self.protocol.transport_tries == 0 {
            return Err(ConfigError::Validation(
                "Transport tries must be at least 1".to_string(),
            ));
        }
        if self.protocol.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "Max attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            serial: 0,
            password: String::new(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            transport_tries: default_transport_tries(),
            max_attempts: default_max_attempts(),
        }
    }
}
