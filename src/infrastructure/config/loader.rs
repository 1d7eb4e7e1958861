use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_attempts: {0}. Cannot be 0")]
    InvalidMaxAttempts(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid backoff multiplier: {0}. Must be at least 1.0")]
    InvalidMultiplier(f64),

    #[error("Invalid max_group_cpu: {0}. Must be between 1 and 100")]
    InvalidGroupCpu(u32),

    #[error("Invalid max_system_load_percent: {0}. Must be in (0, 100]")]
    InvalidSystemLoad(f32),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Directory holding project configuration, relative to the working directory.
pub const CONFIG_DIR: &str = ".steward";

/// Prefix for environment overrides; nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "STEWARD_";

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .steward/config.yaml (project config)
    /// 3. .steward/local.yaml (local overrides, optional)
    /// 4. Environment variables (STEWARD_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(Path::new(CONFIG_DIR))
    }

    /// Same as [`ConfigLoader::load`], reading the YAML layers from `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
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
            return Err(ConfigError::InvalidLogRotation(config.logging.rotation.clone()));
        }

        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(config.retry.max_attempts));
        }

        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if config.retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(config.retry.multiplier));
        }

        if config.scheduler.max_group_cpu == 0 || config.scheduler.max_group_cpu > 100 {
            return Err(ConfigError::InvalidGroupCpu(config.scheduler.max_group_cpu));
        }

        let load = config.scheduler.max_system_load_percent;
        if !(load > 0.0 && load <= 100.0) {
            return Err(ConfigError::InvalidSystemLoad(load));
        }

        if config.scheduler.max_group_memory_mb == 0 {
            return Err(ConfigError::ValidationFailed(
                "scheduler.max_group_memory_mb must be positive".to_string(),
            ));
        }

        if config.orchestrator.tick_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "orchestrator.tick_interval_secs must be positive".to_string(),
            ));
        }

        if config.executor.restic_binary.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "executor.restic_binary cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
