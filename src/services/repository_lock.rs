//! File-based repository lock with stale-holder recovery.
//!
//! The lock is a single JSON record at `<repository>/.lock`. It is written to
//! a private temporary file first and published with a hard link, which fails
//! atomically when the lock file already exists. Readers therefore see either
//! no lock or a complete record.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{LockError, LockResult};
use crate::domain::models::{lock_file_path, LockConfig, LockInfo, RepositoryOperation};
use crate::domain::ports::{Clock, ProcessIdentity};
use crate::services::lock_metrics::LockMetricsTracker;

const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const BREAK_MARKER_TTL: Duration = Duration::from_secs(30);

/// Cross-process mutual exclusion for one or more repositories.
///
/// One instance may guard many repositories; the in-memory acquisition
/// timestamps used for hold-time metrics are keyed by lock path.
pub struct RepositoryLock {
    identity: Arc<dyn ProcessIdentity>,
    clock: Arc<dyn Clock>,
    metrics: Arc<LockMetricsTracker>,
    retry_interval: Duration,
    acquired: Mutex<HashMap<PathBuf, DateTime<Utc>>>,
}

impl RepositoryLock {
    pub fn new(identity: Arc<dyn ProcessIdentity>, clock: Arc<dyn Clock>) -> Self {
        Self {
            identity,
            clock,
            metrics: Arc::new(LockMetricsTracker::new()),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            acquired: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(
        config: &LockConfig,
        identity: Arc<dyn ProcessIdentity>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(identity, clock).with_retry_interval(Duration::from_millis(config.retry_interval_ms))
    }

    /// Share a metrics tracker with other lock instances.
    pub fn with_metrics(mut self, metrics: Arc<LockMetricsTracker>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn metrics(&self) -> &Arc<LockMetricsTracker> {
        &self.metrics
    }

    /// Acquire the lock on `repository` for `operation`.
    ///
    /// A stale lock is broken and the attempt repeated at once. A live holder
    /// fails the call immediately with [`LockError::AlreadyLocked`]. A lock
    /// file that disappears between the create attempt and the read, or a
    /// stale lock another contender is already breaking, is a transient race:
    /// the call sleeps the retry interval and tries again until `timeout` has
    /// elapsed.
    ///
    /// # Errors
    ///
    /// - `AlreadyLocked` carrying the current holder's record
    /// - `AcquisitionTimeout` when the deadline passes during races
    /// - `CorruptLockRecord` when the existing lock file cannot be parsed
    /// - `PermissionDenied` / `OperationFailed` for filesystem failures
    pub async fn acquire(
        &self,
        repository: &Path,
        operation: RepositoryOperation,
        timeout: Duration,
    ) -> LockResult<LockInfo> {
        let path = lock_file_path(repository);
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            let record = LockInfo::new(
                operation,
                self.clock.now(),
                self.identity.pid(),
                self.identity.hostname(),
                self.identity.username(),
            );

            if self.try_publish(&path, &record).await? {
                let waited = started.elapsed();
                self.metrics.record_acquisition(operation, waited);
                self.acquired
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(path.clone(), record.acquired_at);
                info!(
                    repository = %repository.display(),
                    operation = %operation,
                    pid = record.pid,
                    waited_ms = waited.as_millis(),
                    "Repository lock acquired"
                );
                return Ok(record);
            }

            match self.check_lock_status(repository).await? {
                Some(existing) if self.is_stale(&existing) => {
                    if self.break_if_unchanged(&path, &existing).await? == BreakOutcome::Broken {
                        warn!(
                            repository = %repository.display(),
                            holder_pid = existing.pid,
                            holder_host = %existing.hostname,
                            holder_operation = %existing.operation,
                            acquired_at = %existing.acquired_at,
                            "Broke stale repository lock"
                        );
                        self.metrics.record_stale_break(operation);
                        continue;
                    }
                }
                Some(existing) => {
                    self.metrics.record_contention(operation);
                    debug!(
                        repository = %repository.display(),
                        holder_pid = existing.pid,
                        holder_operation = %existing.operation,
                        "Repository already locked"
                    );
                    return Err(LockError::AlreadyLocked(Box::new(existing)));
                }
                None => {}
            }

            let now = Instant::now();
            if now >= deadline {
                self.metrics.record_timeout(operation);
                return Err(LockError::AcquisitionTimeout {
                    path,
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.retry_interval.min(deadline - now)).await;
        }
    }

    /// Release a lock this process holds for `operation`.
    ///
    /// Releasing when no lock exists is a no-op. A lock owned by another
    /// process, or held for a different operation, is left untouched.
    pub async fn release(&self, repository: &Path, operation: RepositoryOperation) -> LockResult<()> {
        let path = lock_file_path(repository);

        let Some(existing) = self.check_lock_status(repository).await? else {
            debug!(repository = %repository.display(), "No lock to release");
            self.forget_acquisition(&path);
            return Ok(());
        };

        if !existing.is_held_by(self.identity.pid(), &self.identity.hostname()) {
            return Err(LockError::OperationFailed(format!(
                "lock on {} is owned by another process (pid {} on {})",
                repository.display(),
                existing.pid,
                existing.hostname
            )));
        }
        if existing.operation != operation {
            return Err(LockError::OperationFailed(format!(
                "operation mismatch: lock on {} is held for {}, not {}",
                repository.display(),
                existing.operation,
                operation
            )));
        }

        remove_lock_file(&path).await?;

        let acquired_at = self.forget_acquisition(&path).unwrap_or(existing.acquired_at);
        let held = (self.clock.now() - acquired_at).to_std().unwrap_or_default();
        self.metrics.record_release(operation, held);
        info!(
            repository = %repository.display(),
            operation = %operation,
            held_ms = held.as_millis(),
            "Repository lock released"
        );
        Ok(())
    }

    /// Read the current lock record, if any.
    ///
    /// # Errors
    ///
    /// A lock file that exists but cannot be parsed is reported as
    /// [`LockError::CorruptLockRecord`], never as "unlocked".
    pub async fn check_lock_status(&self, repository: &Path) -> LockResult<Option<LockInfo>> {
        let path = lock_file_path(repository);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LockError::from_io(path, &e)),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| LockError::CorruptLockRecord {
                path,
                reason: e.to_string(),
            })
    }

    /// A lock is stale when its holder is gone or it is older than the
    /// staleness ceiling.
    ///
    /// Liveness is probed locally by pid; the recorded hostname is not
    /// consulted.
    pub fn is_stale(&self, info: &LockInfo) -> bool {
        !self.identity.is_alive(info.pid) || info.is_expired(self.clock.now())
    }

    /// Remove a stale lock. Returns the record that was removed, or `None`
    /// when the repository was not locked.
    ///
    /// # Errors
    ///
    /// Fails with `OperationFailed` if the lock is not stale.
    pub async fn break_stale_lock(&self, repository: &Path) -> LockResult<Option<LockInfo>> {
        let Some(existing) = self.check_lock_status(repository).await? else {
            return Ok(None);
        };

        if !self.is_stale(&existing) {
            return Err(LockError::OperationFailed(format!(
                "lock on {} held by live pid {} is not stale",
                repository.display(),
                existing.pid
            )));
        }

        match self.break_if_unchanged(&lock_file_path(repository), &existing).await? {
            BreakOutcome::Broken => {}
            BreakOutcome::Busy => {
                return Err(LockError::OperationFailed(format!(
                    "lock on {} is being broken by another process",
                    repository.display()
                )));
            }
            BreakOutcome::Changed => {
                return Err(LockError::OperationFailed(format!(
                    "lock on {} changed while it was being broken",
                    repository.display()
                )));
            }
        }
        self.metrics.record_stale_break(existing.operation);
        warn!(
            repository = %repository.display(),
            holder_pid = existing.pid,
            holder_operation = %existing.operation,
            "Stale repository lock broken"
        );
        Ok(Some(existing))
    }

    /// Acquire the lock and wrap it in a guard that releases it when dropped.
    ///
    /// Prefer [`LockGuard::release`]; the drop path only exists for holders
    /// that are cancelled mid-operation.
    pub async fn acquire_guard(
        self: &Arc<Self>,
        repository: &Path,
        operation: RepositoryOperation,
        timeout: Duration,
    ) -> LockResult<LockGuard> {
        let info = self.acquire(repository, operation, timeout).await?;
        Ok(LockGuard {
            lock: Arc::clone(self),
            repository: repository.to_path_buf(),
            info,
            released: false,
        })
    }

    /// Synchronous release used when a guard is dropped without `release`.
    /// Only removes the file if it still holds exactly `info`.
    fn release_abandoned(&self, repository: &Path, info: &LockInfo) {
        let path = lock_file_path(repository);
        let current = std::fs::read_to_string(&path)
            .ok()
            .and_then(|contents| serde_json::from_str::<LockInfo>(&contents).ok());
        if current.as_ref() != Some(info) {
            return;
        }

        if let Err(e) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "Failed to remove abandoned repository lock");
            return;
        }

        let acquired_at = self.forget_acquisition(&path).unwrap_or(info.acquired_at);
        let held = (self.clock.now() - acquired_at).to_std().unwrap_or_default();
        self.metrics.record_release(info.operation, held);
        warn!(
            repository = %repository.display(),
            operation = %info.operation,
            held_ms = held.as_millis(),
            "Repository lock released by dropped guard"
        );
    }

    /// Write `record` to a temp file and hard-link it into place.
    /// Returns `false` if a lock file already exists.
    async fn try_publish(&self, path: &Path, record: &LockInfo) -> LockResult<bool> {
        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| LockError::OperationFailed(format!("serialize lock record: {e}")))?;

        let temp_path = temp_lock_path(path, record.pid);
        tokio::fs::write(&temp_path, &body)
            .await
            .map_err(|e| LockError::from_io(temp_path.clone(), &e))?;

        let linked = tokio::fs::hard_link(&temp_path, path).await;
        if let Err(e) = tokio::fs::remove_file(&temp_path).await {
            debug!(path = %temp_path.display(), error = %e, "Failed to remove temporary lock file");
        }

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(LockError::from_io(path, &e)),
        }
    }

    /// Remove the lock file only if it still holds `seen`.
    ///
    /// Breakers exclude each other with a `create_new` marker next to the lock.
    /// Under the marker the record is read again, then moved to a private
    /// tombstone and compared once more. A record that is no longer `seen` is
    /// linked back into place, so a fresh lock published by another contender
    /// is never discarded.
    async fn break_if_unchanged(&self, path: &Path, seen: &LockInfo) -> LockResult<BreakOutcome> {
        let Some(_marker) = BreakMarker::claim(path, self.identity.pid()).await? else {
            return Ok(BreakOutcome::Busy);
        };

        if read_record(path).await?.as_ref() != Some(seen) {
            return Ok(BreakOutcome::Changed);
        }

        let tombstone = sibling_path(path, &format!(".{}.stale", Uuid::new_v4().simple()));
        match tokio::fs::rename(path, &tombstone).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BreakOutcome::Changed),
            Err(e) => return Err(LockError::from_io(path, &e)),
        }

        let removed = read_record(&tombstone).await;
        if matches!(&removed, Ok(Some(record)) if record == seen) {
            remove_lock_file(&tombstone).await?;
            return Ok(BreakOutcome::Broken);
        }

        if let Err(e) = tokio::fs::hard_link(&tombstone, path).await {
            warn!(
                path = %path.display(),
                error = %e,
                "Failed to restore repository lock moved aside while breaking"
            );
        }
        remove_lock_file(&tombstone).await?;
        removed?;
        Ok(BreakOutcome::Changed)
    }

    fn forget_acquisition(&self, path: &Path) -> Option<DateTime<Utc>> {
        self.acquired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
    }
}

/// A held repository lock.
pub struct LockGuard {
    lock: Arc<RepositoryLock>,
    repository: PathBuf,
    info: LockInfo,
    released: bool,
}

impl LockGuard {
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub async fn release(mut self) -> LockResult<()> {
        self.released = true;
        self.lock.release(&self.repository, self.info.operation).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            self.lock.release_abandoned(&self.repository, &self.info);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakOutcome {
    Broken,
    /// Another contender holds the break marker.
    Busy,
    /// The lock file no longer holds the stale record.
    Changed,
}

/// Exclusive right to break the lock next to it. Removed on drop.
struct BreakMarker {
    path: PathBuf,
}

impl BreakMarker {
    /// Claim the marker, or return `None` while another breaker holds it.
    /// A marker left behind by a crashed breaker is cleared once it is older
    /// than [`BREAK_MARKER_TTL`].
    async fn claim(lock_path: &Path, pid: u32) -> LockResult<Option<Self>> {
        let path = sibling_path(lock_path, ".break");
        let created = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;

        match created {
            Ok(mut file) => {
                file.write_all(pid.to_string().as_bytes())
                    .await
                    .map_err(|e| LockError::from_io(path.clone(), &e))?;
                Ok(Some(Self { path }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                clear_abandoned_marker(&path).await;
                Ok(None)
            }
            Err(e) => Err(LockError::from_io(path, &e)),
        }
    }
}

impl Drop for BreakMarker {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove lock break marker");
            }
        }
    }
}

async fn clear_abandoned_marker(path: &Path) {
    let age = tokio::fs::metadata(path)
        .await
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok());

    if age.is_some_and(|age| age > BREAK_MARKER_TTL) {
        warn!(path = %path.display(), "Clearing abandoned lock break marker");
        if let Err(e) = remove_lock_file(path).await {
            debug!(path = %path.display(), error = %e, "Failed to clear lock break marker");
        }
    }
}

async fn read_record(path: &Path) -> LockResult<Option<LockInfo>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(serde_json::from_str(&contents).ok()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(LockError::from_io(path.to_path_buf(), &e)),
    }
}

fn sibling_path(lock_path: &Path, suffix: &str) -> PathBuf {
    let mut name = lock_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    lock_path.with_file_name(name)
}

fn temp_lock_path(lock_path: &Path, pid: u32) -> PathBuf {
    sibling_path(lock_path, &format!(".{pid}.{}.tmp", Uuid::new_v4().simple()))
}

async fn remove_lock_file(path: &Path) -> LockResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LockError::from_io(path, &e)),
    }
}
