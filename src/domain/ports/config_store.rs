//! Repository port for schedule, task configuration and retry persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::StoreResult;
use crate::domain::models::{
    MaintenanceResult, MaintenanceSchedule, MaintenanceTask, RetryState, TaskConfiguration,
};

/// Durable storage for everything the orchestrator needs to survive a
/// restart.
///
/// Repositories are keyed by their storage path. Task and weekday
/// enumerations are stored by their stable string names.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Load every stored schedule.
    async fn load_schedules(&self) -> StoreResult<HashMap<PathBuf, MaintenanceSchedule>>;

    /// Insert or replace the schedule for a repository.
    async fn save_schedule(&self, repository: &Path, schedule: &MaintenanceSchedule) -> StoreResult<()>;

    /// Delete a repository's schedule. Returns whether one existed.
    async fn delete_schedule(&self, repository: &Path) -> StoreResult<bool>;

    /// Load stored task configuration overrides.
    async fn load_task_configurations(&self) -> StoreResult<HashMap<MaintenanceTask, TaskConfiguration>>;

    /// Insert or replace a task configuration.
    async fn save_task_configuration(&self, configuration: &TaskConfiguration) -> StoreResult<()>;

    /// Load the retry counter for one task on one repository.
    async fn load_retry_state(
        &self,
        repository: &Path,
        task: MaintenanceTask,
    ) -> StoreResult<Option<RetryState>>;

    /// Persist the retry counter for one task on one repository.
    async fn save_retry_state(
        &self,
        repository: &Path,
        task: MaintenanceTask,
        state: &RetryState,
    ) -> StoreResult<()>;

    /// Forget the retry counter after a success.
    async fn clear_retry_state(&self, repository: &Path, task: MaintenanceTask) -> StoreResult<()>;

    /// Load the last-run trigger time of every repository.
    async fn load_last_runs(&self) -> StoreResult<HashMap<PathBuf, DateTime<Utc>>>;

    /// Persist a repository's last-run trigger time.
    async fn save_last_run(&self, repository: &Path, at: DateTime<Utc>) -> StoreResult<()>;

    /// Append a finished run to the history.
    async fn record_result(&self, result: &MaintenanceResult) -> StoreResult<()>;

    /// Most recent runs for a repository, newest first.
    async fn recent_results(&self, repository: &Path, limit: usize) -> StoreResult<Vec<MaintenanceResult>>;
}
