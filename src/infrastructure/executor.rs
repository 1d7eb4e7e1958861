//! `restic`-backed maintenance executor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::domain::errors::{ExecutorError, LockError};
use crate::domain::models::config::{ExecutorConfig, LockConfig};
use crate::domain::models::{MaintenanceTask, RepositoryOperation};
use crate::domain::ports::BackupExecutor;
use crate::services::{LockGuard, RepositoryLock};

/// Repository lock held on behalf of every task of this process currently
/// running against one repository.
struct Lease {
    guard: LockGuard,
    holders: usize,
}

type Leases = Arc<Mutex<HashMap<PathBuf, Lease>>>;

/// Runs maintenance as `restic` subcommands while holding the repository
/// lock.
///
/// Tasks of one group run concurrently against the same repository, so the
/// lock is leased per repository: the first task to start takes it and the
/// last one to finish releases it. A lock held by another live process is
/// waited out, polling every `retry_interval_ms`, for up to `lock_wait_secs`.
///
/// Children are killed when their future is dropped, so a group timeout
/// that aborts the task also stops the process.
pub struct ResticCommandExecutor {
    binary: String,
    keep_within: String,
    lock: Arc<RepositoryLock>,
    lock_timeout: Duration,
    lock_wait: Duration,
    retry_interval: Duration,
    leases: Leases,
    gates: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResticCommandExecutor {
    pub fn new(config: &ExecutorConfig, lock_config: &LockConfig, lock: Arc<RepositoryLock>) -> Self {
        Self {
            binary: config.restic_binary.clone(),
            keep_within: config.keep_within.clone(),
            lock,
            lock_timeout: Duration::from_secs(lock_config.acquire_timeout_secs),
            lock_wait: Duration::from_secs(config.lock_wait_secs),
            retry_interval: Duration::from_millis(lock_config.retry_interval_ms),
            leases: Arc::new(Mutex::new(HashMap::new())),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Arguments after `-r <repository>` for `task`.
    pub fn arguments(&self, task: MaintenanceTask) -> Vec<String> {
        let args: &[&str] = match task {
            MaintenanceTask::HealthCheck => &["cat", "config"],
            MaintenanceTask::Prune => &["prune"],
            MaintenanceTask::RebuildIndex => &["repair", "index"],
            MaintenanceTask::CheckIntegrity => &["check"],
            MaintenanceTask::RemoveStaleSnapshots => {
                return vec![
                    "forget".to_string(),
                    "--keep-within".to_string(),
                    self.keep_within.clone(),
                    "--prune".to_string(),
                ];
            }
        };
        args.iter().map(ToString::to_string).collect()
    }

    /// Operation tag recorded in the lock file for `task`.
    pub fn lock_operation(task: MaintenanceTask) -> RepositoryOperation {
        match task {
            MaintenanceTask::Prune | MaintenanceTask::RemoveStaleSnapshots => RepositoryOperation::Prune,
            MaintenanceTask::CheckIntegrity => RepositoryOperation::Check,
            MaintenanceTask::HealthCheck | MaintenanceTask::RebuildIndex => RepositoryOperation::Maintenance,
        }
    }

    async fn run(&self, task: MaintenanceTask, repository: &Path) -> Result<(), ExecutorError> {
        let args = self.arguments(task);
        let command_line = format!("{} -r {} {}", self.binary, repository.display(), args.join(" "));

        let lease = self.enter(task, repository).await?;

        debug!(command = %command_line, "Spawning maintenance command");
        let started = Instant::now();
        let output = Command::new(&self.binary)
            .arg("-r")
            .arg(repository)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        lease.leave().await;

        let output = output.map_err(|source| ExecutorError::Spawn {
            command: command_line.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(ExecutorError::CommandFailed {
                command: command_line,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(
            task = %task,
            repository = %repository.display(),
            duration_ms = started.elapsed().as_millis(),
            "Maintenance command succeeded"
        );
        Ok(())
    }

    /// Join the repository's lease, taking the lock if no task holds it yet.
    async fn enter(&self, task: MaintenanceTask, repository: &Path) -> Result<LeaseTicket, ExecutorError> {
        let gate = Arc::clone(
            self.gates
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(repository.to_path_buf())
                .or_default(),
        );
        let _entering = gate.lock().await;

        let joined = self
            .leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(repository)
            .map(|lease| {
                lease.holders += 1;
                lease.guard.info().operation
            });

        match joined {
            Some(operation) => debug!(
                task = %task,
                repository = %repository.display(),
                operation = %operation,
                "Joined repository lock held by this process"
            ),
            None => {
                let guard = self.acquire_waiting(repository, Self::lock_operation(task)).await?;
                self.leases
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(repository.to_path_buf(), Lease { guard, holders: 1 });
            }
        }

        Ok(LeaseTicket {
            leases: Arc::clone(&self.leases),
            repository: repository.to_path_buf(),
            active: true,
        })
    }

    async fn acquire_waiting(
        &self,
        repository: &Path,
        operation: RepositoryOperation,
    ) -> Result<LockGuard, ExecutorError> {
        let deadline = Instant::now() + self.lock_wait;
        loop {
            match self.lock.acquire_guard(repository, operation, self.lock_timeout).await {
                Err(LockError::AlreadyLocked(holder)) if Instant::now() < deadline => {
                    debug!(
                        repository = %repository.display(),
                        holder_pid = holder.pid,
                        holder_operation = %holder.operation,
                        "Waiting for repository lock"
                    );
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    tokio::time::sleep(self.retry_interval.min(remaining)).await;
                }
                result => return result.map_err(ExecutorError::from),
            }
        }
    }
}

/// One task's share of a [`Lease`]. Dropping it without [`LeaseTicket::leave`]
/// still gives the share back; the last share releases the lock.
struct LeaseTicket {
    leases: Leases,
    repository: PathBuf,
    active: bool,
}

impl LeaseTicket {
    async fn leave(mut self) {
        if let Some(guard) = self.take_last() {
            if let Err(e) = guard.release().await {
                warn!(repository = %self.repository.display(), error = %e, "Failed to release repository lock");
            }
        }
    }

    /// Give the share back. Returns the guard when this was the last holder.
    fn take_last(&mut self) -> Option<LockGuard> {
        if !std::mem::replace(&mut self.active, false) {
            return None;
        }

        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        let lease = leases.get_mut(&self.repository)?;
        lease.holders = lease.holders.saturating_sub(1);
        if lease.holders > 0 {
            return None;
        }
        leases.remove(&self.repository).map(|lease| lease.guard)
    }
}

impl Drop for LeaseTicket {
    fn drop(&mut self) {
        drop(self.take_last());
    }
}

#[async_trait]
impl BackupExecutor for ResticCommandExecutor {
    async fn health_check(&self, repository: &Path) -> Result<(), ExecutorError> {
        self.run(MaintenanceTask::HealthCheck, repository).await
    }

    async fn prune(&self, repository: &Path) -> Result<(), ExecutorError> {
        self.run(MaintenanceTask::Prune, repository).await
    }

    async fn rebuild_index(&self, repository: &Path) -> Result<(), ExecutorError> {
        self.run(MaintenanceTask::RebuildIndex, repository).await
    }

    async fn check_integrity(&self, repository: &Path) -> Result<(), ExecutorError> {
        self.run(MaintenanceTask::CheckIntegrity, repository).await
    }

    async fn remove_stale_snapshots(&self, repository: &Path) -> Result<(), ExecutorError> {
        self.run(MaintenanceTask::RemoveStaleSnapshots, repository).await
    }
}
