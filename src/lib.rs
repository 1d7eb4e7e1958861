//! Steward - maintenance orchestrator for backup repositories
//!
//! Steward keeps backup repositories healthy by running maintenance tasks
//! (health checks, pruning, index rebuilds, integrity checks) on per-repository
//! weekly schedules, while making sure no two operations touch a repository
//! at the same time.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and the port traits the core consumes
//! - **Service Layer** (`services`): repository locking, task planning, retry and orchestration
//! - **Adapters** (`adapters`): SQLite and in-memory stores, completion notifiers
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging, process identity and the backup command executor
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use steward::services::{RepositoryLock, TaskScheduler};
//!
//! let lock = Arc::new(RepositoryLock::new(identity, clock));
//! let guard = lock.acquire_guard(repo, RepositoryOperation::Prune, timeout).await?;
//! // ... exclusive work ...
//! guard.release().await?;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{ExecutorError, LockError, MaintenanceError, StoreError};
pub use domain::models::{
    Config, LockInfo, MaintenanceResult, MaintenanceSchedule, MaintenanceTask, RepositoryOperation,
    RunOutcome, ScheduleDay, TaskConfiguration, TaskPriority,
};
pub use domain::ports::{BackupExecutor, Clock, ConfigStore, ProcessIdentity, ResourceProbe};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{MaintenanceOrchestrator, RepositoryLock, TaskRecovery, TaskScheduler};
