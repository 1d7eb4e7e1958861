//! Repository lock record.
//!
//! The lock file is both the existence proof and the ownership record of a
//! lock: there is no separate lock table.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::operation::RepositoryOperation;

/// Name of the lock file inside a repository directory.
pub const LOCK_FILE_NAME: &str = ".lock";

/// Age in seconds after which a lock is stale even if its holder still looks alive.
pub const STALE_LOCK_AGE_SECS: i64 = 60 * 60;

/// [`STALE_LOCK_AGE_SECS`] as a duration.
pub fn stale_lock_age() -> Duration {
    Duration::seconds(STALE_LOCK_AGE_SECS)
}

/// Path of the lock file guarding `repository`.
pub fn lock_file_path(repository: &Path) -> PathBuf {
    repository.join(LOCK_FILE_NAME)
}

/// Immutable description of a held lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Operation the holder is performing.
    pub operation: RepositoryOperation,
    /// When the lock was granted.
    pub acquired_at: DateTime<Utc>,
    /// Process id of the holder.
    pub pid: u32,
    /// Host the holder runs on.
    pub hostname: String,
    /// User the holder runs as.
    pub username: String,
}

impl LockInfo {
    pub fn new(
        operation: RepositoryOperation,
        acquired_at: DateTime<Utc>,
        pid: u32,
        hostname: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            acquired_at,
            pid,
            hostname: hostname.into(),
            username: username.into(),
        }
    }

    /// How long the lock has been held as of `now`. Never negative.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.acquired_at).max(Duration::zero())
    }

    /// Whether the lock is older than the staleness ceiling.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.age(now) > stale_lock_age()
    }

    /// Whether the record names the given process as its holder.
    pub fn is_held_by(&self, pid: u32, hostname: &str) -> bool {
        self.pid == pid && self.hostname == hostname
    }
}
