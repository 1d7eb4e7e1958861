use std::path::Path;

use async_trait::async_trait;

use crate::domain::errors::ExecutorError;
use crate::domain::models::MaintenanceTask;

/// Port for the component that actually runs repository commands.
///
/// Each operation returns normally on success and an [`ExecutorError`]
/// otherwise. Implementations are responsible for holding the repository
/// lock around the work they do; the orchestrator never locks on their
/// behalf.
///
/// # Examples
///
/// ```no_run
/// use steward::domain::ports::BackupExecutor;
/// use steward::domain::models::MaintenanceTask;
/// use std::path::Path;
///
/// async fn example(executor: &dyn BackupExecutor) {
///     let _ = executor.execute(MaintenanceTask::Prune, Path::new("/srv/repo")).await;
/// }
/// ```
#[async_trait]
pub trait BackupExecutor: Send + Sync {
    /// Query basic repository health.
    async fn health_check(&self, repository: &Path) -> Result<(), ExecutorError>;

    /// Remove unreferenced data.
    async fn prune(&self, repository: &Path) -> Result<(), ExecutorError>;

    /// Rebuild the repository index.
    async fn rebuild_index(&self, repository: &Path) -> Result<(), ExecutorError>;

    /// Run a consistency check.
    async fn check_integrity(&self, repository: &Path) -> Result<(), ExecutorError>;

    /// Garbage-collect snapshots outside the retention window.
    async fn remove_stale_snapshots(&self, repository: &Path) -> Result<(), ExecutorError>;

    /// Dispatch `task` to its operation.
    async fn execute(&self, task: MaintenanceTask, repository: &Path) -> Result<(), ExecutorError> {
        match task {
            MaintenanceTask::HealthCheck => self.health_check(repository).await,
            MaintenanceTask::Prune => self.prune(repository).await,
            MaintenanceTask::RebuildIndex => self.rebuild_index(repository).await,
            MaintenanceTask::CheckIntegrity => self.check_integrity(repository).await,
            MaintenanceTask::RemoveStaleSnapshots => self.remove_stale_snapshots(repository).await,
        }
    }
}
