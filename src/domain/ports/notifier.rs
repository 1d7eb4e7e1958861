use async_trait::async_trait;

use crate::domain::models::MaintenanceResult;

/// Receives one event per finished maintenance run.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, result: &MaintenanceResult);
}
