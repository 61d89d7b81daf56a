//! Application configuration using Figment
//!
//! Configuration is layered:
//! 1. Built-in defaults (the reference test setup)
//! 2. `config/rp_continuity.toml`, or the file given with `--config`
//! 3. Environment variables prefixed with `RP_CONTINUITY_`, using `__` between
//!    section and key, e.g. `RP_CONTINUITY_DEVICE__HOST=10.0.0.2`
//!
//! # Example
//! ```no_run
//! use rp_continuity::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! println!("Device: {}", config.device.address());
//! # Ok::<(), rp_continuity::config::ConfigError>(())
//! ```

use daq_driver_red_pitaya::{
    AcquisitionConfig, DeviceConfig, MockDeviceConfig, MonitorConfig, SessionConfig, StreamError,
};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/rp_continuity.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "RP_CONTINUITY_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Invalid(String),

    #[error(transparent)]
    Session(#[from] StreamError),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Load(Box::new(e))
    }
}

/// Output format for log events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides it
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub acquisition: AcquisitionConfig,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
    /// Emulator settings, used when `device.mock` is set
    pub mock: MockDeviceConfig,
}

impl AppConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] (if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; the defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if self.mock.drop_every == Some(0) {
            return Err(ConfigError::Invalid(
                "'mock.drop_every' must be at least 1".to_string(),
            ));
        }

        self.session_config().validate()?;
        Ok(())
    }

    /// The part of the configuration the streaming session consumes.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            device: self.device.clone(),
            acquisition: self.acquisition.clone(),
            monitor: self.monitor.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(!config.device.mock);
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.acquisition.frame_records = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Session(_))));

        let mut config = AppConfig::default();
        config.mock.drop_every = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_config_carries_sections() {
        let mut config = AppConfig::default();
        config.device.host = "10.1.2.3".to_string();
        config.monitor.threshold = 42;
        let session = config.session_config();
        assert_eq!(session.device.host, "10.1.2.3");
        assert_eq!(session.monitor.threshold, 42);
        assert_eq!(session.acquisition, config.acquisition);
    }
}
