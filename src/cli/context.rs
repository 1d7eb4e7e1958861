//! Wiring shared by CLI commands: configuration, store and services.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::sqlite::{initialize_database, SqliteConfigStore};
use crate::adapters::TracingNotifier;
use crate::domain::models::{Config, MaintenanceTask, TaskConfiguration};
use crate::domain::ports::{Clock, ConfigStore, ProcessIdentity, ResourceProbe, SystemClock};
use crate::infrastructure::{ResticCommandExecutor, SystemProcessIdentity};
use crate::services::{MaintenanceOrchestrator, RepositoryLock, TaskRecovery, TaskScheduler};

/// Everything a command needs, opened once per invocation.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteConfigStore>,
    pub clock: Arc<dyn Clock>,
    pub identity: Arc<dyn ProcessIdentity>,
}

impl AppContext {
    /// Open the configured database, applying pending migrations.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = initialize_database(&config.database.path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.database.path))?;

        Ok(Self {
            config,
            store: Arc::new(SqliteConfigStore::new(pool)),
            clock: Arc::new(SystemClock),
            identity: Arc::new(SystemProcessIdentity::new()),
        })
    }

    /// Built-in task catalogue with stored overrides applied.
    pub async fn task_configurations(&self) -> Result<HashMap<MaintenanceTask, TaskConfiguration>> {
        let mut configurations = TaskConfiguration::defaults();
        let overrides = self
            .store
            .load_task_configurations()
            .await
            .context("Failed to load task configurations")?;
        configurations.extend(overrides);
        Ok(configurations)
    }

    pub async fn scheduler(&self, probe: Arc<dyn ResourceProbe>) -> Result<TaskScheduler> {
        let configurations = self.task_configurations().await?;
        TaskScheduler::new(configurations, self.config.scheduler.clone(), probe)
            .context("Invalid task configuration")
    }

    pub fn repository_lock(&self) -> Arc<RepositoryLock> {
        Arc::new(RepositoryLock::from_config(
            &self.config.lock,
            Arc::clone(&self.identity),
            Arc::clone(&self.clock),
        ))
    }

    /// Assemble an orchestrator over the `restic` executor, with schedules
    /// and last-run times loaded from the store.
    pub async fn orchestrator(&self, probe: Arc<dyn ResourceProbe>) -> Result<Arc<MaintenanceOrchestrator>> {
        let store: Arc<dyn ConfigStore> = self.store.clone();
        let scheduler = Arc::new(self.scheduler(probe).await?);
        let recovery = Arc::new(TaskRecovery::new(
            Arc::clone(&store),
            Arc::clone(&self.clock),
            self.config.retry.clone(),
        ));
        let executor = Arc::new(ResticCommandExecutor::new(
            &self.config.executor,
            &self.config.lock,
            self.repository_lock(),
        ));

        let orchestrator = MaintenanceOrchestrator::new(scheduler, recovery, executor, store, Arc::clone(&self.clock))
            .with_notifier(Arc::new(TracingNotifier));
        orchestrator
            .load_from_store()
            .await
            .context("Failed to load maintenance schedules")?;

        Ok(Arc::new(orchestrator))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.config.orchestrator.tick_interval_secs)
    }
}

/// Canonical storage key for a repository given on the command line.
/// Paths that do not exist yet are made absolute without resolving links.
pub fn resolve_repository(path: &Path) -> Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(resolved) => Ok(resolved),
        Err(_) => std::path::absolute(path)
            .with_context(|| format!("Invalid repository path: {}", path.display())),
    }
}
