use serde::{Deserialize, Serialize};

/// Point-in-time view of host resources.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Memory available to new work, in MB.
    pub available_memory_mb: u64,
    /// Current CPU load as a percentage of all cores (0.0-100.0).
    pub cpu_load_percent: f32,
}

/// Port for sampling host resources before starting a task group.
pub trait ResourceProbe: Send + Sync {
    fn snapshot(&self) -> ResourceSnapshot;
}
