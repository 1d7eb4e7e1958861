use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::errors::StoreResult;
use crate::domain::models::{
    MaintenanceResult, MaintenanceSchedule, MaintenanceTask, RetryState, TaskConfiguration,
};
use crate::domain::ports::ConfigStore;

#[derive(Debug, Default)]
struct State {
    schedules: HashMap<PathBuf, MaintenanceSchedule>,
    task_configurations: HashMap<MaintenanceTask, TaskConfiguration>,
    retry_states: HashMap<(PathBuf, MaintenanceTask), RetryState>,
    last_runs: HashMap<PathBuf, DateTime<Utc>>,
    results: Vec<MaintenanceResult>,
}

/// In-memory config store for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    state: RwLock<State>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn load_schedules(&self) -> StoreResult<HashMap<PathBuf, MaintenanceSchedule>> {
        Ok(self.state.read().await.schedules.clone())
    }

    async fn save_schedule(&self, repository: &Path, schedule: &MaintenanceSchedule) -> StoreResult<()> {
        self.state
            .write()
            .await
            .schedules
            .insert(repository.to_path_buf(), schedule.clone());
        Ok(())
    }

    async fn delete_schedule(&self, repository: &Path) -> StoreResult<bool> {
        Ok(self.state.write().await.schedules.remove(repository).is_some())
    }

    async fn load_task_configurations(&self) -> StoreResult<HashMap<MaintenanceTask, TaskConfiguration>> {
        Ok(self.state.read().await.task_configurations.clone())
    }

    async fn save_task_configuration(&self, configuration: &TaskConfiguration) -> StoreResult<()> {
        self.state
            .write()
            .await
            .task_configurations
            .insert(configuration.task, configuration.clone());
        Ok(())
    }

    async fn load_retry_state(
        &self,
        repository: &Path,
        task: MaintenanceTask,
    ) -> StoreResult<Option<RetryState>> {
        let state = self.state.read().await;
        Ok(state.retry_states.get(&(repository.to_path_buf(), task)).cloned())
    }

    async fn save_retry_state(
        &self,
        repository: &Path,
        task: MaintenanceTask,
        retry: &RetryState,
    ) -> StoreResult<()> {
        self.state
            .write()
            .await
            .retry_states
            .insert((repository.to_path_buf(), task), retry.clone());
        Ok(())
    }

    async fn clear_retry_state(&self, repository: &Path, task: MaintenanceTask) -> StoreResult<()> {
        self.state
            .write()
            .await
            .retry_states
            .remove(&(repository.to_path_buf(), task));
        Ok(())
    }

    async fn load_last_runs(&self) -> StoreResult<HashMap<PathBuf, DateTime<Utc>>> {
        Ok(self.state.read().await.last_runs.clone())
    }

    async fn save_last_run(&self, repository: &Path, at: DateTime<Utc>) -> StoreResult<()> {
        self.state
            .write()
            .await
            .last_runs
            .insert(repository.to_path_buf(), at);
        Ok(())
    }

    async fn record_result(&self, result: &MaintenanceResult) -> StoreResult<()> {
        self.state.write().await.results.push(result.clone());
        Ok(())
    }

    async fn recent_results(&self, repository: &Path, limit: usize) -> StoreResult<Vec<MaintenanceResult>> {
        let state = self.state.read().await;
        let mut results: Vec<_> = state
            .results
            .iter()
            .filter(|r| r.repository == repository)
            .cloned()
            .collect();
        results.sort_by_key(|r| std::cmp::Reverse(r.started_at));
        results.truncate(limit);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ScheduleDay;
    use std::collections::{BTreeMap, BTreeSet};

    #[tokio::test]
    async fn test_schedule_crud() {
        let store = InMemoryConfigStore::new();
        let repo = Path::new("/srv/repo");
        let schedule =
            MaintenanceSchedule::new([ScheduleDay::Sunday], 2, 0, 60, [MaintenanceTask::Prune]);

        store.save_schedule(repo, &schedule).await.unwrap();
        assert_eq!(store.load_schedules().await.unwrap().get(repo), Some(&schedule));

        assert!(store.delete_schedule(repo).await.unwrap());
        assert!(!store.delete_schedule(repo).await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_results_newest_first() {
        let store = InMemoryConfigStore::new();
        let repo = Path::new("/srv/repo");
        let base = Utc::now();

        for offset in 0..3 {
            let at = base + chrono::Duration::hours(offset);
            let result = MaintenanceResult::new(repo, at, at, BTreeSet::new(), BTreeMap::new());
            store.record_result(&result).await.unwrap();
        }
        let other = MaintenanceResult::new("/srv/other", base, base, BTreeSet::new(), BTreeMap::new());
        store.record_result(&other).await.unwrap();

        let recent = store.recent_results(repo, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].started_at, base + chrono::Duration::hours(2));
        assert!(recent.iter().all(|r| r.repository == repo));
    }
}
