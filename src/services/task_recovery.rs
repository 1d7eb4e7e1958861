//! Durable retry around a single maintenance task.
//!
//! The attempt counter lives in the [`ConfigStore`] and is bumped before each
//! attempt, so a process that dies mid-task still spends the attempt. An
//! exhausted budget stays exhausted across restarts until the reset window
//! has passed since the last attempt.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tracing::{info, warn};

use crate::domain::errors::{ExecutorError, MaintenanceError, MaintenanceResultOf};
use crate::domain::models::{MaintenanceTask, RetryConfig, RetryState};
use crate::domain::ports::{Clock, ConfigStore};

/// Retry policy executor over persisted retry state.
pub struct TaskRecovery {
    store: Arc<dyn ConfigStore>,
    clock: Arc<dyn Clock>,
    policy: RetryConfig,
}

impl TaskRecovery {
    pub fn new(store: Arc<dyn ConfigStore>, clock: Arc<dyn Clock>, policy: RetryConfig) -> Self {
        Self { store, clock, policy }
    }

    pub fn policy(&self) -> &RetryConfig {
        &self.policy
    }

    /// Run `work` until it succeeds or the retry budget runs out.
    ///
    /// # Errors
    ///
    /// - `RetriesExhausted` if the budget was already spent when called
    /// - `TaskFailed` wrapping the last executor error once this call spends
    ///   the remaining budget
    /// - `Store` if the retry state cannot be read or written
    pub async fn execute_with_retry<F, Fut>(
        &self,
        task: MaintenanceTask,
        repository: &Path,
        mut work: F,
    ) -> MaintenanceResultOf<()>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<(), ExecutorError>> + Send,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut state = self
            .store
            .load_retry_state(repository, task)
            .await?
            .unwrap_or_default();

        if state.is_exhausted(max_attempts) {
            if state.is_reset_due(self.clock.now(), self.reset_after()) {
                info!(
                    repository = %repository.display(),
                    task = %task,
                    previous_attempts = state.attempts,
                    "Retry budget reset"
                );
                state = RetryState::default();
            } else {
                warn!(
                    repository = %repository.display(),
                    task = %task,
                    attempts = state.attempts,
                    last_error = state.last_error.as_deref().unwrap_or(""),
                    "Retry budget exhausted, skipping task"
                );
                return Err(MaintenanceError::RetriesExhausted {
                    task,
                    attempts: state.attempts,
                });
            }
        }

        let mut backoff = self.backoff();

        loop {
            state.begin_attempt(self.clock.now());
            self.store.save_retry_state(repository, task, &state).await?;

            match work().await {
                Ok(()) => {
                    if state.attempts > 1 {
                        info!(
                            repository = %repository.display(),
                            task = %task,
                            attempts = state.attempts,
                            "Task succeeded after retry"
                        );
                    }
                    self.store.clear_retry_state(repository, task).await?;
                    return Ok(());
                }
                Err(err) => {
                    state.last_error = Some(err.to_string());
                    self.store.save_retry_state(repository, task, &state).await?;

                    if state.is_exhausted(max_attempts) {
                        warn!(
                            repository = %repository.display(),
                            task = %task,
                            attempts = state.attempts,
                            error = %err,
                            "Task failed, retry budget spent"
                        );
                        return Err(MaintenanceError::TaskFailed { task, source: err });
                    }

                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| Duration::from_millis(self.policy.max_backoff_ms));
                    warn!(
                        repository = %repository.display(),
                        task = %task,
                        attempt = state.attempts,
                        max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %err,
                        "Task attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn reset_after(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::try_from(self.policy.reset_after_hours).unwrap_or(i64::MAX / 3600))
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.policy.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.policy.max_backoff_ms))
            .with_multiplier(self.policy.multiplier)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryConfigStore;
    use crate::domain::ports::SystemClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    const REPO: &str = "/srv/repo";

    fn fast_policy(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            multiplier: 2.0,
            reset_after_hours: 24,
        }
    }

    fn recovery(store: &Arc<InMemoryConfigStore>, max_attempts: u32) -> TaskRecovery {
        TaskRecovery::new(store.clone(), Arc::new(SystemClock), fast_policy(max_attempts))
    }

    fn failing_until(calls: &AtomicU32, successes_after: u32) -> Result<(), ExecutorError> {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n > successes_after {
            Ok(())
        } else {
            Err(ExecutorError::Failed(format!("attempt {n} failed")))
        }
    }

    #[tokio::test]
    async fn test_success_clears_state() {
        let store = Arc::new(InMemoryConfigStore::new());
        let calls = &AtomicU32::new(0);

        recovery(&store, 3)
            .execute_with_retry(MaintenanceTask::Prune, Path::new(REPO), move || async move {
                failing_until(calls, 1)
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let state = store
            .load_retry_state(Path::new(REPO), MaintenanceTask::Prune)
            .await
            .unwrap();
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn test_budget_spent_reports_last_error() {
        let store = Arc::new(InMemoryConfigStore::new());
        let calls = &AtomicU32::new(0);

        let err = recovery(&store, 3)
            .execute_with_retry(MaintenanceTask::Prune, Path::new(REPO), move || async move {
                failing_until(calls, u32::MAX)
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, MaintenanceError::TaskFailed { .. }));
        assert!(err.to_string().contains("attempt 3 failed"));

        let state = store
            .load_retry_state(Path::new(REPO), MaintenanceTask::Prune)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.attempts, 3);
        assert_eq!(state.last_error.as_deref(), Some("attempt 3 failed"));
    }

    #[tokio::test]
    async fn test_exhausted_budget_survives_restart() {
        let store = Arc::new(InMemoryConfigStore::new());
        let calls = &AtomicU32::new(0);
        let _ = recovery(&store, 2)
            .execute_with_retry(MaintenanceTask::Prune, Path::new(REPO), move || async move {
                failing_until(calls, u32::MAX)
            })
            .await;

        // A fresh instance over the same store sees the spent budget
        let err = recovery(&store, 2)
            .execute_with_retry(MaintenanceTask::Prune, Path::new(REPO), move || async move {
                failing_until(calls, 0)
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MaintenanceError::RetriesExhausted { attempts: 2, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_attempt_counted_before_work_runs() {
        let store = Arc::new(InMemoryConfigStore::new());
        let observed = Arc::new(AtomicU32::new(0));
        let store_ref = store.clone();
        let observed_ref = observed.clone();

        recovery(&store, 3)
            .execute_with_retry(MaintenanceTask::CheckIntegrity, Path::new(REPO), move || {
                let store = store_ref.clone();
                let observed = observed_ref.clone();
                async move {
                    let state = store
                        .load_retry_state(Path::new(REPO), MaintenanceTask::CheckIntegrity)
                        .await
                        .map_err(|e| ExecutorError::Failed(e.to_string()))?;
                    observed.store(state.map_or(0, |s| s.attempts), Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_resets_after_window() {
        let store = Arc::new(InMemoryConfigStore::new());
        let stale = RetryState {
            attempts: 3,
            last_error: Some("old failure".to_string()),
            last_attempt_at: Some(chrono::Utc::now() - chrono::Duration::hours(25)),
        };
        store
            .save_retry_state(Path::new(REPO), MaintenanceTask::Prune, &stale)
            .await
            .unwrap();

        let calls = &AtomicU32::new(0);
        recovery(&store, 3)
            .execute_with_retry(MaintenanceTask::Prune, Path::new(REPO), move || async move {
                failing_until(calls, 0)
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
