//! Domain errors for the Steward maintenance core.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::models::{FailureCause, LockInfo, MaintenanceTask};

/// Format a cycle path as a human-readable string: `a -> b -> a`.
fn format_cycle_path(path: &[MaintenanceTask]) -> String {
    path.iter()
        .map(MaintenanceTask::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Failures of the repository lock.
///
/// All of these are recoverable by the caller: retry, alert or defer.
#[derive(Debug, Error)]
pub enum LockError {
    #[error(
        "Repository locked by pid {} on {} ({}) since {}",
        .0.pid, .0.hostname, .0.operation, .0.acquired_at
    )]
    AlreadyLocked(Box<LockInfo>),

    #[error("Timed out after {waited:?} acquiring lock {}", path.display())]
    AcquisitionTimeout { path: PathBuf, waited: Duration },

    #[error("Corrupt lock record at {}: {reason}", path.display())]
    CorruptLockRecord { path: PathBuf, reason: String },

    #[error("Permission denied on lock file {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("Lock operation failed: {0}")]
    OperationFailed(String),
}

impl LockError {
    /// Classify an I/O failure on the lock file at `path`.
    pub fn from_io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            Self::PermissionDenied(path)
        } else {
            Self::OperationFailed(format!("{}: {err}", path.display()))
        }
    }

    /// The conflicting holder, for `AlreadyLocked`.
    pub fn holder(&self) -> Option<&LockInfo> {
        match self {
            Self::AlreadyLocked(info) => Some(info),
            _ => None,
        }
    }
}

/// Errors reported by a `BackupExecutor`.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("`{command}` exited with status {status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Failed(String),
}

/// Persistence failures in a `ConfigStore`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Migration error: {0}")]
    Migration(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Static task configuration that cannot be planned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Task dependency cycle detected: {}", format_cycle_path(.0))]
    DependencyCycle(Vec<MaintenanceTask>),

    #[error("No configuration for task {0}")]
    MissingConfiguration(MaintenanceTask),

    #[error("Task {task} depends on unconfigured task {dependency}")]
    UnknownDependency {
        task: MaintenanceTask,
        dependency: MaintenanceTask,
    },

    #[error("Task {task} exceeds the group ceiling: {reason}")]
    ExceedsGroupCeiling { task: MaintenanceTask, reason: String },

    #[error("Task {0} has a zero duration estimate")]
    ZeroEstimate(MaintenanceTask),
}

/// Errors surfaced by maintenance planning and execution.
#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("No maintenance schedule found for {}", .0.display())]
    NoScheduleFound(PathBuf),

    #[error("Maintenance already running for {}", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("Task {task} timed out after {limit:?}")]
    Timeout { task: MaintenanceTask, limit: Duration },

    #[error("Task {task} failed: {source}")]
    TaskFailed {
        task: MaintenanceTask,
        #[source]
        source: ExecutorError,
    },

    #[error("Task {task} exhausted its retry budget after {attempts} attempt(s)")]
    RetriesExhausted { task: MaintenanceTask, attempts: u32 },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MaintenanceError {
    /// Cause recorded against a task in a `MaintenanceResult`.
    pub fn failure_cause(&self) -> FailureCause {
        match self {
            Self::Timeout { limit, .. } => FailureCause::Timeout {
                limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            },
            Self::TaskFailed { source, .. } => FailureCause::TaskFailed {
                reason: source.to_string(),
            },
            Self::RetriesExhausted { attempts, .. } => FailureCause::RetriesExhausted {
                attempts: *attempts,
            },
            other => FailureCause::Aborted {
                reason: other.to_string(),
            },
        }
    }
}

pub type MaintenanceResultOf<T> = Result<T, MaintenanceError>;
pub type LockResult<T> = Result<T, LockError>;
pub type StoreResult<T> = Result<T, StoreError>;
