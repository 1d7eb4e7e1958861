//! Lock acquisition and hold-time accounting.
//!
//! Pure bookkeeping: the tracker never touches the filesystem and never
//! blocks on anything but its own short-lived mutex.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::domain::models::RepositoryOperation;

/// Counters for a single operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationLockStats {
    /// Successful acquisitions.
    pub acquisitions: u64,
    /// Releases that removed the lock file.
    pub releases: u64,
    /// Attempts rejected because a live holder owned the lock.
    pub contentions: u64,
    /// Attempts that ran out of time.
    pub timeouts: u64,
    /// Stale locks broken on behalf of this operation.
    pub stale_locks_broken: u64,
    /// Cumulative time between acquisition and release.
    #[serde(with = "duration_millis")]
    pub total_hold: Duration,
    /// Longest single hold.
    #[serde(with = "duration_millis")]
    pub max_hold: Duration,
    /// Cumulative time spent inside `acquire` before success.
    #[serde(with = "duration_millis")]
    pub total_wait: Duration,
}

impl OperationLockStats {
    /// Share of attempts that met a live holder (0.0-1.0).
    #[allow(clippy::cast_precision_loss)]
    pub fn contention_rate(&self) -> f64 {
        let attempts = self.acquisitions + self.contentions + self.timeouts;
        if attempts == 0 {
            return 0.0;
        }
        self.contentions as f64 / attempts as f64
    }

    pub fn average_hold(&self) -> Duration {
        match u32::try_from(self.releases) {
            Ok(0) => Duration::ZERO,
            Ok(releases) => self.total_hold / releases,
            Err(_) => Duration::ZERO,
        }
    }

    fn merge(&mut self, other: &Self) {
        self.acquisitions += other.acquisitions;
        self.releases += other.releases;
        self.contentions += other.contentions;
        self.timeouts += other.timeouts;
        self.stale_locks_broken += other.stale_locks_broken;
        self.total_hold += other.total_hold;
        self.max_hold = self.max_hold.max(other.max_hold);
        self.total_wait += other.total_wait;
    }
}

/// Immutable view of the tracker at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LockMetricsSnapshot {
    pub per_operation: BTreeMap<RepositoryOperation, OperationLockStats>,
}

impl LockMetricsSnapshot {
    pub fn get(&self, operation: RepositoryOperation) -> OperationLockStats {
        self.per_operation.get(&operation).copied().unwrap_or_default()
    }

    /// Counters summed over every operation kind.
    pub fn totals(&self) -> OperationLockStats {
        let mut totals = OperationLockStats::default();
        for stats in self.per_operation.values() {
            totals.merge(stats);
        }
        totals
    }
}

/// Thread-safe per-operation lock statistics.
#[derive(Debug, Default)]
pub struct LockMetricsTracker {
    stats: Mutex<BTreeMap<RepositoryOperation, OperationLockStats>>,
}

impl LockMetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_acquisition(&self, operation: RepositoryOperation, waited: Duration) {
        self.update(operation, |stats| {
            stats.acquisitions += 1;
            stats.total_wait += waited;
        });
    }

    pub fn record_release(&self, operation: RepositoryOperation, held: Duration) {
        self.update(operation, |stats| {
            stats.releases += 1;
            stats.total_hold += held;
            stats.max_hold = stats.max_hold.max(held);
        });
    }

    pub fn record_contention(&self, operation: RepositoryOperation) {
        self.update(operation, |stats| stats.contentions += 1);
    }

    pub fn record_timeout(&self, operation: RepositoryOperation) {
        self.update(operation, |stats| stats.timeouts += 1);
    }

    pub fn record_stale_break(&self, operation: RepositoryOperation) {
        self.update(operation, |stats| stats.stale_locks_broken += 1);
    }

    pub fn snapshot(&self) -> LockMetricsSnapshot {
        let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        LockMetricsSnapshot {
            per_operation: stats.clone(),
        }
    }

    pub fn reset(&self) {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn update(&self, operation: RepositoryOperation, f: impl FnOnce(&mut OperationLockStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f(stats.entry(operation).or_default());
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}
