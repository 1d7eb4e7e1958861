use serde::{Deserialize, Serialize};

/// Main configuration structure for Steward
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Repository lock configuration
    #[serde(default)]
    pub lock: LockConfig,

    /// Task planning ceilings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Orchestrator tick configuration
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Backup executor configuration
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    ".steward/steward.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation policy for file output: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Repository lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LockConfig {
    /// How long an executor waits to obtain a repository lock
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Pause between acquisition attempts after a transient race
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

const fn default_acquire_timeout_secs() -> u64 {
    30
}

const fn default_retry_interval_ms() -> u64 {
    100
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_secs: default_acquire_timeout_secs(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

/// Resource ceilings for a task group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Summed CPU intensity allowed in one group (1-100)
    #[serde(default = "default_max_group_cpu")]
    pub max_group_cpu: u32,

    /// Summed memory budget allowed in one group, in MB
    #[serde(default = "default_max_group_memory_mb")]
    pub max_group_memory_mb: u64,

    /// System CPU load above which groups are deferred
    #[serde(default = "default_max_system_load_percent")]
    pub max_system_load_percent: f32,
}

const fn default_max_group_cpu() -> u32 {
    100
}

const fn default_max_group_memory_mb() -> u64 {
    4096
}

const fn default_max_system_load_percent() -> f32 {
    90.0
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_group_cpu: default_max_group_cpu(),
            max_group_memory_mb: default_max_group_memory_mb(),
            max_system_load_percent: default_max_system_load_percent(),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// Seconds between schedule checks
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

const fn default_tick_interval_secs() -> u64 {
    60
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Attempts allowed per task before the budget is exhausted
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Growth factor between consecutive delays
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Hours after the last attempt at which an exhausted budget starts over
    #[serde(default = "default_reset_after_hours")]
    pub reset_after_hours: u64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    1000
}

const fn default_max_backoff_ms() -> u64 {
    60_000
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_reset_after_hours() -> u64 {
    24
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            reset_after_hours: default_reset_after_hours(),
        }
    }
}

/// Backup executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutorConfig {
    /// restic binary to invoke
    #[serde(default = "default_restic_binary")]
    pub restic_binary: String,

    /// Retention window passed to `forget --keep-within`
    #[serde(default = "default_keep_within")]
    pub keep_within: String,

    /// How long a task waits for a repository locked by another live process
    #[serde(default = "default_lock_wait_secs")]
    pub lock_wait_secs: u64,
}

fn default_restic_binary() -> String {
    "restic".to_string()
}

fn default_keep_within() -> String {
    "30d".to_string()
}

const fn default_lock_wait_secs() -> u64 {
    600
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            restic_binary: default_restic_binary(),
            keep_within: default_keep_within(),
            lock_wait_secs: default_lock_wait_secs(),
        }
    }
}
