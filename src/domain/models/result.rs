//! Outcome of one maintenance run.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use super::maintenance::MaintenanceTask;

/// Why a task did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// The task's group ran past its time limit.
    Timeout { limit_ms: u64 },
    /// The executor reported an error.
    TaskFailed { reason: String },
    /// The persisted retry budget was already spent.
    RetriesExhausted { attempts: u32 },
    /// The task stopped without reporting (panic or cancellation).
    Aborted { reason: String },
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { limit_ms } => write!(f, "timed out after {limit_ms}ms"),
            Self::TaskFailed { reason } => write!(f, "failed: {reason}"),
            Self::RetriesExhausted { attempts } => {
                write!(f, "retries exhausted after {attempts} attempt(s)")
            }
            Self::Aborted { reason } => write!(f, "aborted: {reason}"),
        }
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed,
    TimedOut,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of a finished maintenance run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceResult {
    pub id: Uuid,
    pub repository: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub completed: BTreeSet<MaintenanceTask>,
    pub failed: BTreeMap<MaintenanceTask, FailureCause>,
}

impl MaintenanceResult {
    pub fn new(
        repository: impl Into<PathBuf>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        completed: BTreeSet<MaintenanceTask>,
        failed: BTreeMap<MaintenanceTask, FailureCause>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            repository: repository.into(),
            started_at,
            finished_at,
            completed,
            failed,
        }
    }

    /// A run succeeds when nothing failed. Tasks never attempted because the
    /// run budget ran out count as neither.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn duration(&self) -> Duration {
        self.finished_at - self.started_at
    }

    /// A run with any timed-out task counts as timed out; otherwise any
    /// failure makes it failed.
    pub fn outcome(&self) -> RunOutcome {
        if self.is_success() {
            RunOutcome::Completed
        } else if self
            .failed
            .values()
            .any(|cause| matches!(cause, FailureCause::Timeout { .. }))
        {
            RunOutcome::TimedOut
        } else {
            RunOutcome::Failed
        }
    }
}
