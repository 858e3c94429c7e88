//! Hierarchical configuration loader.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid check_interval_seconds: {0}. Must be positive")]
    InvalidCheckInterval(u64),

    #[error("Invalid scheduling_interval_seconds: {0}. Must be positive")]
    InvalidSchedulingInterval(u64),

    #[error("Invalid heartbeat_interval_seconds: {0}. Must be positive")]
    InvalidHeartbeatInterval(u64),

    #[error(
        "Invalid timeouts: response_timeout_minutes ({response_timeout_minutes}m) must exceed \
         heartbeat_interval_seconds ({heartbeat_interval_seconds}s)"
    )]
    InvalidResponseTimeout {
        heartbeat_interval_seconds: u64,
        response_timeout_minutes: u64,
    },

    #[error("Invalid completion_timeout_multiplier: {0}. Must be at least 1.0")]
    InvalidCompletionMultiplier(f64),

    #[error("Invalid queue_soft_cap: {0}. Must be positive")]
    InvalidQueueSoftCap(u64),

    #[error("Resource limits must be non-zero in every dimension")]
    EmptyResourceLimits,

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .hive/config.yaml (project config)
    /// 3. .hive/local.yaml (project local overrides, optional)
    /// 4. Environment variables (`HIVE_*` prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".hive/config.yaml"))
            .merge(Yaml::file(".hive/local.yaml"))
            .merge(Env::prefixed("HIVE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("HIVE_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    ///
    /// Invalid configuration is fatal at boot; nothing is clamped or
    /// silently corrected.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let core = &config.core;

        if core.check_interval_seconds == 0 {
            return Err(ConfigError::InvalidCheckInterval(core.check_interval_seconds));
        }
        if core.scheduling_interval_seconds == 0 {
            return Err(ConfigError::InvalidSchedulingInterval(
                core.scheduling_interval_seconds,
            ));
        }
        if core.heartbeat_interval_seconds == 0 {
            return Err(ConfigError::InvalidHeartbeatInterval(
                core.heartbeat_interval_seconds,
            ));
        }
        if core.response_timeout_minutes * 60 <= core.heartbeat_interval_seconds {
            return Err(ConfigError::InvalidResponseTimeout {
                heartbeat_interval_seconds: core.heartbeat_interval_seconds,
                response_timeout_minutes: core.response_timeout_minutes,
            });
        }
        if core.completion_timeout_multiplier < 1.0 {
            return Err(ConfigError::InvalidCompletionMultiplier(
                core.completion_timeout_multiplier,
            ));
        }
        if core.queue_soft_cap == 0 {
            return Err(ConfigError::InvalidQueueSoftCap(core.queue_soft_cap));
        }
        if core.resource_limits.is_zero() {
            return Err(ConfigError::EmptyResourceLimits);
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(
                config.logging.rotation.clone(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let mut config = Config::default();
        config.core.check_interval_seconds = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidCheckInterval(0))
        ));
    }

    #[test]
    fn test_validate_rejects_response_timeout_below_heartbeat() {
        let mut config = Config::default();
        config.core.heartbeat_interval_seconds = 600;
        config.core.response_timeout_minutes = 5;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_load_from_file_merges_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "core:\n  max_reassignments: 5\n  scheduling_policy: least-connections\n"
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.core.max_reassignments, 5);
        assert_eq!(
            config.core.scheduling_policy,
            crate::domain::models::PolicyKind::LeastConnections
        );
        // Untouched values keep their defaults
        assert_eq!(config.core.queue_soft_cap, 10_000);
    }

    #[test]
    fn test_env_overrides_file() {
        temp_env::with_var("HIVE_CORE__QUEUE_SOFT_CAP", Some("123"), || {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "core:\n  queue_soft_cap: 55\n").unwrap();
            let config = ConfigLoader::load_from_file(file.path()).unwrap();
            assert_eq!(config.core.queue_soft_cap, 123);
        });
    }
}
