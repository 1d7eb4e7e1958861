//! Durable retry bookkeeping for a single task on a single repository.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Persisted retry counter.
///
/// Written before each attempt so that a crash mid-attempt still counts
/// against the budget.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    /// Attempts started since the budget was last reset.
    pub attempts: u32,
    /// Error reported by the most recent failed attempt.
    pub last_error: Option<String>,
    /// When the most recent attempt started.
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl RetryState {
    /// Whether `max_attempts` have already been started.
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.attempts >= max_attempts
    }

    /// Whether the last attempt is old enough for the budget to start over.
    pub fn is_reset_due(&self, now: DateTime<Utc>, reset_after: Duration) -> bool {
        self.last_attempt_at
            .is_none_or(|last| now - last >= reset_after)
    }

    /// Record the start of a new attempt.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_at = Some(now);
    }
}
