//! SQLite implementation of the ConfigStore.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{parse_datetime, parse_optional_datetime, repository_key};
use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::models::{
    FailureCause, MaintenanceResult, MaintenanceSchedule, MaintenanceTask, RetryState, ScheduleDay,
    TaskConfiguration, TaskPriority,
};
use crate::domain::ports::ConfigStore;

#[derive(Clone)]
pub struct SqliteConfigStore {
    pool: SqlitePool,
}

impl SqliteConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ScheduleRow {
    repository: String,
    days: String,
    hour: i64,
    minute: i64,
    enabled: i32,
    max_duration_minutes: i64,
    tasks: String,
}

fn row_to_schedule(row: ScheduleRow) -> StoreResult<(PathBuf, MaintenanceSchedule)> {
    let days: BTreeSet<ScheduleDay> = serde_json::from_str(&row.days)?;
    let tasks: BTreeSet<MaintenanceTask> = serde_json::from_str(&row.tasks)?;

    let schedule = MaintenanceSchedule {
        days,
        hour: u8::try_from(row.hour).map_err(|e| StoreError::Serialization(e.to_string()))?,
        minute: u8::try_from(row.minute).map_err(|e| StoreError::Serialization(e.to_string()))?,
        enabled: row.enabled != 0,
        max_duration_minutes: u32::try_from(row.max_duration_minutes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        tasks,
    }
    .normalized();

    Ok((PathBuf::from(row.repository), schedule))
}

#[derive(Debug, sqlx::FromRow)]
struct TaskConfigurationRow {
    task: String,
    priority: String,
    estimated_duration_ms: i64,
    max_memory_mb: i64,
    cpu_intensity: i64,
    allows_concurrent_execution: i32,
    dependencies: String,
    can_be_interrupted: i32,
}

fn row_to_configuration(row: TaskConfigurationRow) -> StoreResult<TaskConfiguration> {
    let task = parse_task(&row.task)?;
    let priority = TaskPriority::from_str(&row.priority)
        .ok_or_else(|| StoreError::Serialization(format!("Unknown task priority: {}", row.priority)))?;
    let dependencies: BTreeSet<MaintenanceTask> = serde_json::from_str(&row.dependencies)?;
    let out_of_range = |e: std::num::TryFromIntError| StoreError::Serialization(e.to_string());

    Ok(TaskConfiguration {
        task,
        priority,
        estimated_duration_ms: u64::try_from(row.estimated_duration_ms).map_err(out_of_range)?,
        max_memory_mb: u64::try_from(row.max_memory_mb).map_err(out_of_range)?,
        cpu_intensity: u8::try_from(row.cpu_intensity).map_err(out_of_range)?,
        allows_concurrent_execution: row.allows_concurrent_execution != 0,
        dependencies,
        can_be_interrupted: row.can_be_interrupted != 0,
    })
}

#[derive(Debug, sqlx::FromRow)]
struct RetryStateRow {
    attempts: i64,
    last_error: Option<String>,
    last_attempt_at: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct ResultRow {
    id: String,
    repository: String,
    started_at: String,
    finished_at: String,
    completed: String,
    failed: String,
}

fn row_to_result(row: ResultRow) -> StoreResult<MaintenanceResult> {
    let completed: BTreeSet<MaintenanceTask> = serde_json::from_str(&row.completed)?;
    let failed: BTreeMap<MaintenanceTask, FailureCause> = serde_json::from_str(&row.failed)?;

    Ok(MaintenanceResult {
        id: Uuid::parse_str(&row.id).map_err(|e| StoreError::Serialization(e.to_string()))?,
        repository: PathBuf::from(row.repository),
        started_at: parse_datetime(&row.started_at)?,
        finished_at: parse_datetime(&row.finished_at)?,
        completed,
        failed,
    })
}

fn parse_task(s: &str) -> StoreResult<MaintenanceTask> {
    MaintenanceTask::from_str(s).ok_or_else(|| StoreError::Serialization(format!("Unknown maintenance task: {s}")))
}

fn to_i64<T: TryInto<i64>>(value: T) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}

#[async_trait]
impl ConfigStore for SqliteConfigStore {
    async fn load_schedules(&self) -> StoreResult<HashMap<PathBuf, MaintenanceSchedule>> {
        let rows: Vec<ScheduleRow> = sqlx::query_as(
            "SELECT repository, days, hour, minute, enabled, max_duration_minutes, tasks
             FROM maintenance_schedules",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_schedule).collect()
    }

    async fn save_schedule(&self, repository: &Path, schedule: &MaintenanceSchedule) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO maintenance_schedules
               (repository, days, hour, minute, enabled, max_duration_minutes, tasks, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(repository) DO UPDATE SET
                 days = excluded.days,
                 hour = excluded.hour,
                 minute = excluded.minute,
                 enabled = excluded.enabled,
                 max_duration_minutes = excluded.max_duration_minutes,
                 tasks = excluded.tasks,
                 updated_at = excluded.updated_at"#,
        )
        .bind(repository_key(repository))
        .bind(serde_json::to_string(&schedule.days)?)
        .bind(i64::from(schedule.hour))
        .bind(i64::from(schedule.minute))
        .bind(i32::from(schedule.enabled))
        .bind(i64::from(schedule.max_duration_minutes))
        .bind(serde_json::to_string(&schedule.tasks)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_schedule(&self, repository: &Path) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM maintenance_schedules WHERE repository = ?")
            .bind(repository_key(repository))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn load_task_configurations(&self) -> StoreResult<HashMap<MaintenanceTask, TaskConfiguration>> {
        let rows: Vec<TaskConfigurationRow> = sqlx::query_as(
            "SELECT task, priority, estimated_duration_ms, max_memory_mb, cpu_intensity,
                    allows_concurrent_execution, dependencies, can_be_interrupted
             FROM task_configurations",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row_to_configuration(row).map(|config| (config.task, config)))
            .collect()
    }

    async fn save_task_configuration(&self, configuration: &TaskConfiguration) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT OR REPLACE INTO task_configurations
               (task, priority, estimated_duration_ms, max_memory_mb, cpu_intensity,
                allows_concurrent_execution, dependencies, can_be_interrupted, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(configuration.task.as_str())
        .bind(configuration.priority.as_str())
        .bind(to_i64(configuration.estimated_duration_ms))
        .bind(to_i64(configuration.max_memory_mb))
        .bind(i64::from(configuration.cpu_intensity))
        .bind(i32::from(configuration.allows_concurrent_execution))
        .bind(serde_json::to_string(&configuration.dependencies)?)
        .bind(i32::from(configuration.can_be_interrupted))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_retry_state(
        &self,
        repository: &Path,
        task: MaintenanceTask,
    ) -> StoreResult<Option<RetryState>> {
        let row: Option<RetryStateRow> = sqlx::query_as(
            "SELECT attempts, last_error, last_attempt_at FROM retry_states
             WHERE repository = ? AND task = ?",
        )
        .bind(repository_key(repository))
        .bind(task.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(RetryState {
                attempts: u32::try_from(row.attempts).unwrap_or(u32::MAX),
                last_error: row.last_error,
                last_attempt_at: parse_optional_datetime(row.last_attempt_at)?,
            })
        })
        .transpose()
    }

    async fn save_retry_state(
        &self,
        repository: &Path,
        task: MaintenanceTask,
        state: &RetryState,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT OR REPLACE INTO retry_states
               (repository, task, attempts, last_error, last_attempt_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(repository_key(repository))
        .bind(task.as_str())
        .bind(i64::from(state.attempts))
        .bind(&state.last_error)
        .bind(state.last_attempt_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_retry_state(&self, repository: &Path, task: MaintenanceTask) -> StoreResult<()> {
        sqlx::query("DELETE FROM retry_states WHERE repository = ? AND task = ?")
            .bind(repository_key(repository))
            .bind(task.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn load_last_runs(&self) -> StoreResult<HashMap<PathBuf, DateTime<Utc>>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT repository, last_run_at FROM last_runs")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(repository, at)| Ok((PathBuf::from(repository), parse_datetime(&at)?)))
            .collect()
    }

    async fn save_last_run(&self, repository: &Path, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("INSERT OR REPLACE INTO last_runs (repository, last_run_at) VALUES (?, ?)")
            .bind(repository_key(repository))
            .bind(at.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn record_result(&self, result: &MaintenanceResult) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO maintenance_results
               (id, repository, started_at, finished_at, outcome, completed, failed)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(result.id.to_string())
        .bind(repository_key(&result.repository))
        .bind(result.started_at.to_rfc3339())
        .bind(result.finished_at.to_rfc3339())
        .bind(result.outcome().as_str())
        .bind(serde_json::to_string(&result.completed)?)
        .bind(serde_json::to_string(&result.failed)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_results(&self, repository: &Path, limit: usize) -> StoreResult<Vec<MaintenanceResult>> {
        let rows: Vec<ResultRow> = sqlx::query_as(
            "SELECT id, repository, started_at, finished_at, completed, failed
             FROM maintenance_results
             WHERE repository = ?
             ORDER BY started_at DESC
             LIMIT ?",
        )
        .bind(repository_key(repository))
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_result).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use chrono::Duration;

    async fn setup_store() -> SqliteConfigStore {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteConfigStore::new(pool)
    }

    #[tokio::test]
    async fn test_schedule_round_trip_and_replace() {
        let store = setup_store().await;
        let repo = Path::new("/srv/backups/main");

        let schedule = MaintenanceSchedule::new(
            [ScheduleDay::Monday, ScheduleDay::Thursday],
            3,
            15,
            120,
            [MaintenanceTask::HealthCheck, MaintenanceTask::Prune],
        );
        store.save_schedule(repo, &schedule).await.unwrap();

        let loaded = store.load_schedules().await.unwrap();
        assert_eq!(loaded.get(repo), Some(&schedule));

        let replaced = schedule.clone().disabled();
        store.save_schedule(repo, &replaced).await.unwrap();
        let loaded = store.load_schedules().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(!loaded[repo].enabled);

        assert!(store.delete_schedule(repo).await.unwrap());
        assert!(!store.delete_schedule(repo).await.unwrap());
        assert!(store.load_schedules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_task_configuration_override() {
        let store = setup_store().await;
        let config = TaskConfiguration::new(MaintenanceTask::CheckIntegrity, TaskPriority::Low)
            .with_memory_mb(4096)
            .with_dependencies([MaintenanceTask::HealthCheck, MaintenanceTask::Prune]);

        store.save_task_configuration(&config).await.unwrap();

        let loaded = store.load_task_configurations().await.unwrap();
        assert_eq!(loaded.get(&MaintenanceTask::CheckIntegrity), Some(&config));
    }

    #[tokio::test]
    async fn test_retry_state_lifecycle() {
        let store = setup_store().await;
        let repo = Path::new("/srv/backups/main");
        let task = MaintenanceTask::Prune;

        assert!(store.load_retry_state(repo, task).await.unwrap().is_none());

        let mut state = RetryState::default();
        state.begin_attempt(Utc::now());
        state.last_error = Some("repository busy".to_string());
        store.save_retry_state(repo, task, &state).await.unwrap();

        let loaded = store.load_retry_state(repo, task).await.unwrap().unwrap();
        assert_eq!(loaded.attempts, 1);
        assert_eq!(loaded.last_error.as_deref(), Some("repository busy"));
        assert!(loaded.last_attempt_at.is_some());

        // Other repositories keep their own counters.
        assert!(store
            .load_retry_state(Path::new("/srv/backups/other"), task)
            .await
            .unwrap()
            .is_none());

        store.clear_retry_state(repo, task).await.unwrap();
        assert!(store.load_retry_state(repo, task).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_last_run_upsert() {
        let store = setup_store().await;
        let repo = Path::new("/srv/backups/main");
        let first = Utc::now() - Duration::days(1);
        let second = Utc::now();

        store.save_last_run(repo, first).await.unwrap();
        store.save_last_run(repo, second).await.unwrap();

        let runs = store.load_last_runs().await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[repo].timestamp(), second.timestamp());
    }

    #[tokio::test]
    async fn test_results_newest_first_with_limit() {
        let store = setup_store().await;
        let repo = Path::new("/srv/backups/main");
        let base = Utc::now() - Duration::hours(3);

        for offset in 0..3 {
            let started = base + Duration::hours(offset);
            let mut failed = BTreeMap::new();
            if offset == 1 {
                failed.insert(MaintenanceTask::Prune, FailureCause::Timeout { limit_ms: 1_000 });
            }
            let result = MaintenanceResult::new(
                repo,
                started,
                started + Duration::minutes(5),
                BTreeSet::from([MaintenanceTask::HealthCheck]),
                failed,
            );
            store.record_result(&result).await.unwrap();
        }

        let recent = store.recent_results(repo, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].started_at > recent[1].started_at);
        assert_eq!(
            recent[1].failed.get(&MaintenanceTask::Prune),
            Some(&FailureCause::Timeout { limit_ms: 1_000 })
        );
        assert!(store.recent_results(Path::new("/elsewhere"), 10).await.unwrap().is_empty());
    }
}
