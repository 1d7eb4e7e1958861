//! Domain models for repository maintenance.

pub mod config;
pub mod lock;
pub mod maintenance;
pub mod operation;
pub mod result;
pub mod retry;
pub mod schedule;

pub use config::{
    Config, DatabaseConfig, ExecutorConfig, LockConfig, LoggingConfig, OrchestratorConfig,
    RetryConfig, SchedulerConfig,
};
pub use lock::{lock_file_path, stale_lock_age, LockInfo, LOCK_FILE_NAME, STALE_LOCK_AGE_SECS};
pub use maintenance::{MaintenanceTask, MaintenanceTaskGroup, TaskConfiguration, TaskPriority};
pub use operation::RepositoryOperation;
pub use result::{FailureCause, MaintenanceResult, RunOutcome};
pub use retry::RetryState;
pub use schedule::{MaintenanceSchedule, ScheduleDay, MIN_MAX_DURATION_MINUTES};
