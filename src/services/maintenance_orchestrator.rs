//! Time-triggered maintenance coordinator.
//!
//! Each repository moves through `Idle -> Due -> Running -> (Completed |
//! Failed | TimedOut) -> Idle`. A periodic tick checks every schedule, plans
//! the requested tasks into groups, and executes the groups in order. Each
//! group runs under a deadline and the whole run under the schedule's budget.
//!
//! The schedules, last-run times and running set share one mutex. The
//! orchestrator never takes the repository lock itself; executors do.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::domain::errors::{MaintenanceError, MaintenanceResultOf, StoreResult};
use crate::domain::models::{
    FailureCause, MaintenanceResult, MaintenanceSchedule, MaintenanceTask, MaintenanceTaskGroup,
};
use crate::domain::ports::{BackupExecutor, Clock, CompletionNotifier, ConfigStore};
use crate::services::task_recovery::TaskRecovery;
use crate::services::task_scheduler::TaskScheduler;

/// Group deadline as a multiple of the group's estimated duration.
pub const GROUP_TIMEOUT_FACTOR: f64 = 1.5;

#[derive(Debug, Default)]
struct OrchestratorState {
    schedules: HashMap<PathBuf, MaintenanceSchedule>,
    last_runs: HashMap<PathBuf, DateTime<Utc>>,
    running: HashSet<PathBuf>,
}

/// Completed and failed tasks of one group or one run.
#[derive(Debug, Default)]
struct Tally {
    completed: BTreeSet<MaintenanceTask>,
    failed: BTreeMap<MaintenanceTask, FailureCause>,
}

impl Tally {
    fn record(&mut self, task: MaintenanceTask, outcome: MaintenanceResultOf<()>) {
        match outcome {
            Ok(()) => {
                self.completed.insert(task);
            }
            Err(err) => {
                self.failed.insert(task, err.failure_cause());
            }
        }
    }

    fn merge(&mut self, other: Self) {
        self.completed.extend(other.completed);
        self.failed.extend(other.failed);
    }
}

/// Drives scheduled and manual maintenance runs.
pub struct MaintenanceOrchestrator {
    scheduler: Arc<TaskScheduler>,
    recovery: Arc<TaskRecovery>,
    executor: Arc<dyn BackupExecutor>,
    store: Arc<dyn ConfigStore>,
    clock: Arc<dyn Clock>,
    notifiers: Vec<Arc<dyn CompletionNotifier>>,
    state: Mutex<OrchestratorState>,
    ticking: AtomicBool,
}

impl MaintenanceOrchestrator {
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        recovery: Arc<TaskRecovery>,
        executor: Arc<dyn BackupExecutor>,
        store: Arc<dyn ConfigStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scheduler,
            recovery,
            executor,
            store,
            clock,
            notifiers: Vec::new(),
            state: Mutex::new(OrchestratorState::default()),
            ticking: AtomicBool::new(false),
        }
    }

    /// Register an observer of finished runs.
    pub fn with_notifier(mut self, notifier: Arc<dyn CompletionNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    /// Load schedules and last-run times from the store, replacing the
    /// in-memory copies. Returns the number of schedules loaded.
    pub async fn load_from_store(&self) -> StoreResult<usize> {
        let schedules = self.store.load_schedules().await?;
        let last_runs = self.store.load_last_runs().await?;

        let mut state = self.state.lock().await;
        state.schedules = schedules
            .into_iter()
            .map(|(repo, schedule)| (repo, schedule.normalized()))
            .collect();
        state.last_runs = last_runs;
        info!(schedules = state.schedules.len(), "Loaded maintenance schedules");
        Ok(state.schedules.len())
    }

    /// Create or replace a repository's schedule and persist it.
    pub async fn set_schedule(&self, repository: &Path, schedule: MaintenanceSchedule) -> StoreResult<()> {
        let schedule = schedule.normalized();
        self.store.save_schedule(repository, &schedule).await?;
        info!(
            repository = %repository.display(),
            trigger = %schedule.description(),
            enabled = schedule.enabled,
            "Maintenance schedule saved"
        );
        self.state
            .lock()
            .await
            .schedules
            .insert(repository.to_path_buf(), schedule);
        Ok(())
    }

    /// Remove a repository's schedule. Returns whether one existed.
    pub async fn remove_schedule(&self, repository: &Path) -> StoreResult<bool> {
        let existed = self.store.delete_schedule(repository).await?;
        let mut state = self.state.lock().await;
        let removed = state.schedules.remove(repository).is_some();
        state.last_runs.remove(repository);
        Ok(existed || removed)
    }

    pub async fn schedules(&self) -> HashMap<PathBuf, MaintenanceSchedule> {
        self.state.lock().await.schedules.clone()
    }

    pub async fn last_run(&self, repository: &Path) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_runs.get(repository).copied()
    }

    pub async fn running_repositories(&self) -> Vec<PathBuf> {
        let state = self.state.lock().await;
        let mut running: Vec<PathBuf> = state.running.iter().cloned().collect();
        running.sort();
        running
    }

    /// Check every schedule once and run the due ones concurrently.
    ///
    /// Repositories already running are skipped. Returns the results of the
    /// runs started by this tick.
    pub async fn tick(&self) -> Vec<MaintenanceResult> {
        let now = self.clock.now();
        let local_now = self.clock.to_local(now);

        let due: Vec<(PathBuf, MaintenanceSchedule)> = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let due: Vec<(PathBuf, MaintenanceSchedule)> = state
                .schedules
                .iter()
                .filter(|(repo, _)| !state.running.contains(*repo))
                .filter(|(repo, schedule)| {
                    let last_run = state.last_runs.get(*repo).map(|at| self.clock.to_local(*at));
                    schedule.is_due(local_now, last_run)
                })
                .map(|(repo, schedule)| (repo.clone(), schedule.clone()))
                .collect();

            for (repo, _) in &due {
                state.running.insert(repo.clone());
            }
            due
        };

        if due.is_empty() {
            debug!("No maintenance due");
            return Vec::new();
        }

        join_all(
            due.into_iter()
                .map(|(repo, schedule)| self.run_claimed(repo, schedule, now)),
        )
        .await
    }

    /// Run a repository's schedule now, bypassing the due check.
    ///
    /// # Errors
    ///
    /// - `NoScheduleFound` if the repository has no schedule
    /// - `AlreadyRunning` if a run for the repository is in progress
    pub async fn trigger_maintenance(&self, repository: &Path) -> MaintenanceResultOf<MaintenanceResult> {
        let now = self.clock.now();

        let schedule = {
            let mut state = self.state.lock().await;
            let schedule = state
                .schedules
                .get(repository)
                .cloned()
                .ok_or_else(|| MaintenanceError::NoScheduleFound(repository.to_path_buf()))?;
            if !state.running.insert(repository.to_path_buf()) {
                return Err(MaintenanceError::AlreadyRunning(repository.to_path_buf()));
            }
            schedule
        };

        info!(repository = %repository.display(), "Manual maintenance triggered");
        Ok(self.run_claimed(repository.to_path_buf(), schedule, now).await)
    }

    /// Start the periodic tick loop.
    ///
    /// Each tick's runs are spawned separately so a long run never delays
    /// the next schedule check.
    pub fn start(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        self.ticking.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "Maintenance orchestrator started");

            while this.ticking.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !this.ticking.load(Ordering::SeqCst) {
                    break;
                }
                let tick = Arc::clone(&this);
                tokio::spawn(async move {
                    tick.tick().await;
                });
            }

            info!("Maintenance orchestrator stopped");
        })
    }

    pub fn stop(&self) {
        self.ticking.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.ticking.load(Ordering::SeqCst)
    }

    /// Execute a run for a repository already inserted into the running set,
    /// then record, release and announce it.
    async fn run_claimed(
        &self,
        repository: PathBuf,
        schedule: MaintenanceSchedule,
        triggered_at: DateTime<Utc>,
    ) -> MaintenanceResult {
        let result = self.execute_run(&repository, &schedule).await;

        {
            let mut state = self.state.lock().await;
            state.last_runs.insert(repository.clone(), triggered_at);
            state.running.remove(&repository);
        }

        if let Err(e) = self.store.save_last_run(&repository, triggered_at).await {
            error!(repository = %repository.display(), error = %e, "Failed to persist last run");
        }
        if let Err(e) = self.store.record_result(&result).await {
            error!(repository = %repository.display(), error = %e, "Failed to record maintenance result");
        }

        info!(
            repository = %repository.display(),
            outcome = %result.outcome(),
            completed = result.completed.len(),
            failed = result.failed.len(),
            duration_secs = result.duration().num_seconds(),
            "Maintenance run finished"
        );

        for notifier in &self.notifiers {
            notifier.notify(&result).await;
        }

        result
    }

    async fn execute_run(&self, repository: &Path, schedule: &MaintenanceSchedule) -> MaintenanceResult {
        let started_at = self.clock.now();
        let budget = schedule.max_duration();
        let groups = self.scheduler.schedule_tasks(&schedule.tasks);
        let mut tally = Tally::default();

        info!(
            repository = %repository.display(),
            groups = groups.len(),
            budget_minutes = schedule.max_duration_minutes,
            "Maintenance run started"
        );

        for (index, group) in groups.iter().enumerate() {
            if self.scheduler.can_run_task_group(group) {
                tally.merge(self.execute_group(repository, group).await);
            } else {
                warn!(
                    repository = %repository.display(),
                    group = %group,
                    "Deferring task group, resources unavailable"
                );
            }

            let elapsed = self.clock.now() - started_at;
            let remaining = &groups[index + 1..];
            if elapsed > budget && !remaining.is_empty() {
                let skipped: Vec<String> = remaining.iter().map(ToString::to_string).collect();
                warn!(
                    repository = %repository.display(),
                    elapsed_minutes = elapsed.num_minutes(),
                    skipped = ?skipped,
                    "Maintenance budget exceeded, abandoning remaining groups"
                );
                break;
            }
        }

        MaintenanceResult::new(
            repository,
            started_at,
            self.clock.now(),
            tally.completed,
            tally.failed,
        )
    }

    /// Run one group under its deadline.
    ///
    /// Results arrive over a channel. When the deadline wins, the join set
    /// is aborted and the receiver dropped, so late completions are
    /// discarded and every unreported member is marked as timed out.
    async fn execute_group(&self, repository: &Path, group: &MaintenanceTaskGroup) -> Tally {
        let limit = self
            .scheduler
            .estimate_group_duration(group)
            .mul_f64(GROUP_TIMEOUT_FACTOR);
        let deadline = Instant::now() + limit;

        let (tx, mut rx) = mpsc::unbounded_channel::<(MaintenanceTask, MaintenanceResultOf<()>)>();
        let mut set = JoinSet::new();

        if group.allows_concurrent_execution {
            for &task in &group.tasks {
                let runner = self.runner(repository);
                let tx = tx.clone();
                set.spawn(async move {
                    let outcome = runner.run(task).await;
                    let _ = tx.send((task, outcome));
                });
            }
        } else {
            let runner = self.runner(repository);
            let tasks = group.tasks.clone();
            let tx = tx.clone();
            set.spawn(async move {
                for task in tasks {
                    let outcome = runner.run(task).await;
                    if tx.send((task, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        debug!(
            repository = %repository.display(),
            group = %group,
            limit_ms = limit.as_millis(),
            "Task group started"
        );

        let mut pending: BTreeSet<MaintenanceTask> = group.tasks.iter().copied().collect();
        let mut tally = Tally::default();
        let mut timed_out = false;

        while !pending.is_empty() {
            tokio::select! {
                biased;
                message = rx.recv() => match message {
                    Some((task, outcome)) => {
                        pending.remove(&task);
                        if let Err(err) = &outcome {
                            warn!(
                                repository = %repository.display(),
                                task = %task,
                                error = %err,
                                "Maintenance task failed"
                            );
                        }
                        tally.record(task, outcome);
                    }
                    None => break,
                },
                () = tokio::time::sleep_until(deadline) => {
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out {
            set.abort_all();
            drop(rx);
            warn!(
                repository = %repository.display(),
                group = %group,
                limit_ms = limit.as_millis(),
                unfinished = ?pending,
                "Task group timed out"
            );
            let limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
            for task in pending {
                tally.failed.insert(task, FailureCause::Timeout { limit_ms });
            }
            return tally;
        }

        let mut reason = String::from("task ended without reporting a result");
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(repository = %repository.display(), error = %e, "Maintenance task crashed");
                reason = e.to_string();
            }
        }
        for task in pending {
            tally.failed.insert(task, FailureCause::Aborted { reason: reason.clone() });
        }
        tally
    }

    fn runner(&self, repository: &Path) -> TaskRunner {
        TaskRunner {
            recovery: Arc::clone(&self.recovery),
            executor: Arc::clone(&self.executor),
            repository: repository.to_path_buf(),
        }
    }
}

/// Owned handles needed to run one task on a spawned future.
struct TaskRunner {
    recovery: Arc<TaskRecovery>,
    executor: Arc<dyn BackupExecutor>,
    repository: PathBuf,
}

impl TaskRunner {
    async fn run(&self, task: MaintenanceTask) -> MaintenanceResultOf<()> {
        let executor = &self.executor;
        let repository = self.repository.as_path();
        self.recovery
            .execute_with_retry(task, repository, || executor.execute(task, repository))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryConfigStore;
    use crate::domain::errors::ExecutorError;
    use crate::domain::models::{RetryConfig, ScheduleDay, SchedulerConfig};
    use crate::domain::ports::{ResourceProbe, ResourceSnapshot, SystemClock};
    use async_trait::async_trait;

    struct Roomy;

    impl ResourceProbe for Roomy {
        fn snapshot(&self) -> ResourceSnapshot {
            ResourceSnapshot {
                available_memory_mb: 64 * 1024,
                cpu_load_percent: 1.0,
            }
        }
    }

    /// Succeeds at everything except the listed tasks.
    struct Executor {
        failing: Vec<MaintenanceTask>,
        calls: std::sync::Mutex<Vec<MaintenanceTask>>,
    }

    #[async_trait]
    impl BackupExecutor for Executor {
        async fn health_check(&self, _: &Path) -> Result<(), ExecutorError> {
            unreachable!("dispatched through execute")
        }
        async fn prune(&self, _: &Path) -> Result<(), ExecutorError> {
            unreachable!("dispatched through execute")
        }
        async fn rebuild_index(&self, _: &Path) -> Result<(), ExecutorError> {
            unreachable!("dispatched through execute")
        }
        async fn check_integrity(&self, _: &Path) -> Result<(), ExecutorError> {
            unreachable!("dispatched through execute")
        }
        async fn remove_stale_snapshots(&self, _: &Path) -> Result<(), ExecutorError> {
            unreachable!("dispatched through execute")
        }

        async fn execute(&self, task: MaintenanceTask, _: &Path) -> Result<(), ExecutorError> {
            self.calls.lock().unwrap().push(task);
            if self.failing.contains(&task) {
                Err(ExecutorError::Failed(format!("{task} broke")))
            } else {
                Ok(())
            }
        }
    }

    fn orchestrator(failing: Vec<MaintenanceTask>) -> (MaintenanceOrchestrator, Arc<Executor>) {
        let store = Arc::new(InMemoryConfigStore::new());
        let clock = Arc::new(SystemClock);
        let scheduler = Arc::new(
            TaskScheduler::with_defaults(SchedulerConfig::default(), Arc::new(Roomy)).unwrap(),
        );
        let policy = RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        };
        let recovery = Arc::new(TaskRecovery::new(store.clone(), clock.clone(), policy));
        let executor = Arc::new(Executor {
            failing,
            calls: std::sync::Mutex::new(Vec::new()),
        });
        let orchestrator =
            MaintenanceOrchestrator::new(scheduler, recovery, executor.clone(), store, clock);
        (orchestrator, executor)
    }

    fn every_day(tasks: impl IntoIterator<Item = MaintenanceTask>) -> MaintenanceSchedule {
        MaintenanceSchedule::new(ScheduleDay::ALL, 0, 0, 120, tasks)
    }

    #[tokio::test]
    async fn test_trigger_runs_groups_in_plan_order() {
        let (orchestrator, executor) = orchestrator(Vec::new());
        let repo = Path::new("/srv/repo");
        orchestrator
            .set_schedule(repo, every_day(MaintenanceTask::ALL))
            .await
            .unwrap();

        let result = orchestrator.trigger_maintenance(repo).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.completed.len(), 5);
        assert_eq!(
            *executor.calls.lock().unwrap(),
            vec![
                MaintenanceTask::HealthCheck,
                MaintenanceTask::CheckIntegrity,
                MaintenanceTask::Prune,
                MaintenanceTask::RemoveStaleSnapshots,
                MaintenanceTask::RebuildIndex,
            ]
        );
        assert!(orchestrator.running_repositories().await.is_empty());
        assert!(orchestrator.last_run(repo).await.is_some());
    }

    #[tokio::test]
    async fn test_task_failure_does_not_abort_siblings() {
        let (orchestrator, _) = orchestrator(vec![MaintenanceTask::HealthCheck]);
        let repo = Path::new("/srv/repo");
        orchestrator
            .set_schedule(repo, every_day([MaintenanceTask::HealthCheck, MaintenanceTask::Prune]))
            .await
            .unwrap();

        let result = orchestrator.trigger_maintenance(repo).await.unwrap();
        assert!(!result.is_success());
        assert!(result.completed.contains(&MaintenanceTask::Prune));
        assert!(matches!(
            result.failed.get(&MaintenanceTask::HealthCheck),
            Some(FailureCause::TaskFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_trigger_without_schedule_fails() {
        let (orchestrator, _) = orchestrator(Vec::new());
        assert!(matches!(
            orchestrator.trigger_maintenance(Path::new("/nowhere")).await,
            Err(MaintenanceError::NoScheduleFound(_))
        ));
    }

    #[tokio::test]
    async fn test_tick_runs_due_schedule_once_per_day() {
        let (orchestrator, _) = orchestrator(Vec::new());
        let repo = Path::new("/srv/repo");
        orchestrator
            .set_schedule(repo, every_day([MaintenanceTask::HealthCheck]))
            .await
            .unwrap();

        assert_eq!(orchestrator.tick().await.len(), 1);
        assert!(orchestrator.tick().await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_schedule_never_ticks() {
        let (orchestrator, _) = orchestrator(Vec::new());
        orchestrator
            .set_schedule(Path::new("/srv/repo"), every_day([MaintenanceTask::HealthCheck]).disabled())
            .await
            .unwrap();
        assert!(orchestrator.tick().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_schedule() {
        let (orchestrator, _) = orchestrator(Vec::new());
        let repo = Path::new("/srv/repo");
        orchestrator
            .set_schedule(repo, every_day([MaintenanceTask::Prune]))
            .await
            .unwrap();

        assert!(orchestrator.remove_schedule(repo).await.unwrap());
        assert!(orchestrator.schedules().await.is_empty());
        assert!(!orchestrator.remove_schedule(repo).await.unwrap());
    }
}
