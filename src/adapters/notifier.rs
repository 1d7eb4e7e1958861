//! Completion notifiers.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::domain::models::{MaintenanceResult, RunOutcome};
use crate::domain::ports::CompletionNotifier;

/// Logs every finished run.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl CompletionNotifier for TracingNotifier {
    async fn notify(&self, result: &MaintenanceResult) {
        let outcome = result.outcome();
        let duration_secs = result.duration().num_seconds();

        if outcome == RunOutcome::Completed {
            info!(
                repository = %result.repository.display(),
                completed = result.completed.len(),
                duration_secs,
                "Maintenance run completed"
            );
        } else {
            let failures: Vec<String> = result
                .failed
                .iter()
                .map(|(task, cause)| format!("{task}: {cause}"))
                .collect();
            warn!(
                repository = %result.repository.display(),
                %outcome,
                completed = result.completed.len(),
                failed = ?failures,
                duration_secs,
                "Maintenance run did not complete"
            );
        }
    }
}

/// Fans finished runs out to any number of subscribers.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<MaintenanceResult>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MaintenanceResult> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl CompletionNotifier for BroadcastNotifier {
    async fn notify(&self, result: &MaintenanceResult) {
        // No subscribers is fine.
        let _ = self.sender.send(result.clone());
    }
}
