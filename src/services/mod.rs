pub mod dependency_resolver;
pub mod lock_metrics;
pub mod maintenance_orchestrator;
pub mod repository_lock;
pub mod resource_monitor;
pub mod task_recovery;
pub mod task_scheduler;

pub use dependency_resolver::DependencyResolver;
pub use lock_metrics::{LockMetricsSnapshot, LockMetricsTracker, OperationLockStats};
pub use maintenance_orchestrator::{MaintenanceOrchestrator, GROUP_TIMEOUT_FACTOR};
pub use repository_lock::{LockGuard, RepositoryLock};
pub use resource_monitor::SystemResourceProbe;
pub use task_recovery::TaskRecovery;
pub use task_scheduler::{GroupRequirements, TaskScheduler};
