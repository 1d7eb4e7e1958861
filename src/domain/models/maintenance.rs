//! Maintenance task domain model.
//!
//! Maintenance tasks are the work items a schedule requests. Each has a static
//! [`TaskConfiguration`] describing its priority, resource needs and
//! dependencies. Configurations form a DAG over `dependencies`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

/// A maintenance work item.
///
/// Declaration order is the tie-breaker when planning tasks of equal priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceTask {
    HealthCheck,
    Prune,
    RebuildIndex,
    CheckIntegrity,
    RemoveStaleSnapshots,
}

impl MaintenanceTask {
    /// All tasks in declaration order.
    pub const ALL: [Self; 5] = [
        Self::HealthCheck,
        Self::Prune,
        Self::RebuildIndex,
        Self::CheckIntegrity,
        Self::RemoveStaleSnapshots,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HealthCheck => "health_check",
            Self::Prune => "prune",
            Self::RebuildIndex => "rebuild_index",
            Self::CheckIntegrity => "check_integrity",
            Self::RemoveStaleSnapshots => "remove_stale_snapshots",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "health_check" => Some(Self::HealthCheck),
            "prune" => Some(Self::Prune),
            "rebuild_index" => Some(Self::RebuildIndex),
            "check_integrity" => Some(Self::CheckIntegrity),
            "remove_stale_snapshots" => Some(Self::RemoveStaleSnapshots),
            _ => None,
        }
    }
}

impl fmt::Display for MaintenanceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority. Lower ordinal runs first; `Critical` tasks run in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical)
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static descriptor of a maintenance task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfiguration {
    /// Task this configuration describes.
    pub task: MaintenanceTask,
    pub priority: TaskPriority,
    /// Expected wall-clock duration in milliseconds.
    pub estimated_duration_ms: u64,
    /// Memory budget in megabytes.
    pub max_memory_mb: u64,
    /// CPU intensity estimate, 0-100.
    pub cpu_intensity: u8,
    /// Whether the task may share a group with other concurrent tasks.
    pub allows_concurrent_execution: bool,
    /// Tasks that must finish before this one starts.
    #[serde(default)]
    pub dependencies: BTreeSet<MaintenanceTask>,
    /// Whether the task can be stopped mid-way without damaging the repository.
    pub can_be_interrupted: bool,
}

impl TaskConfiguration {
    pub fn new(task: MaintenanceTask, priority: TaskPriority) -> Self {
        Self {
            task,
            priority,
            estimated_duration_ms: 60_000,
            max_memory_mb: 256,
            cpu_intensity: 10,
            allows_concurrent_execution: true,
            dependencies: BTreeSet::new(),
            can_be_interrupted: true,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_estimated_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_memory_mb(mut self, max_memory_mb: u64) -> Self {
        self.max_memory_mb = max_memory_mb;
        self
    }

    pub fn with_cpu_intensity(mut self, cpu_intensity: u8) -> Self {
        self.cpu_intensity = cpu_intensity.min(100);
        self
    }

    pub fn with_concurrency(mut self, allows_concurrent_execution: bool) -> Self {
        self.allows_concurrent_execution = allows_concurrent_execution;
        self
    }

    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = MaintenanceTask>) -> Self {
        self.dependencies = dependencies.into_iter().collect();
        self
    }

    pub fn with_interruptible(mut self, can_be_interrupted: bool) -> Self {
        self.can_be_interrupted = can_be_interrupted;
        self
    }

    pub fn estimated_duration(&self) -> Duration {
        Duration::from_millis(self.estimated_duration_ms)
    }

    /// Built-in catalogue, one entry per task.
    pub fn defaults() -> HashMap<MaintenanceTask, Self> {
        use MaintenanceTask::*;

        let minutes = |m: u64| Duration::from_secs(m * 60);

        [
            Self::new(HealthCheck, TaskPriority::Critical)
                .with_estimated_duration(minutes(2))
                .with_memory_mb(256)
                .with_cpu_intensity(10),
            Self::new(Prune, TaskPriority::Medium)
                .with_estimated_duration(minutes(45))
                .with_memory_mb(2048)
                .with_cpu_intensity(70)
                .with_concurrency(false)
                .with_dependencies([HealthCheck])
                .with_interruptible(false),
            Self::new(RebuildIndex, TaskPriority::Medium)
                .with_estimated_duration(minutes(20))
                .with_memory_mb(1024)
                .with_cpu_intensity(50)
                .with_concurrency(false)
                .with_dependencies([Prune])
                .with_interruptible(false),
            Self::new(CheckIntegrity, TaskPriority::High)
                .with_estimated_duration(minutes(60))
                .with_memory_mb(2048)
                .with_cpu_intensity(60)
                .with_dependencies([HealthCheck]),
            Self::new(RemoveStaleSnapshots, TaskPriority::Low)
                .with_estimated_duration(minutes(10))
                .with_memory_mb(512)
                .with_cpu_intensity(30)
                .with_dependencies([HealthCheck]),
        ]
        .into_iter()
        .map(|config| (config.task, config))
        .collect()
    }
}

/// Tasks selected to run together under one resource and time budget.
///
/// Either every member allows concurrent execution, or the group has exactly
/// one member. Critical tasks always form singleton groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceTaskGroup {
    /// Members in planning order.
    pub tasks: Vec<MaintenanceTask>,
    /// Whether members are started together.
    pub allows_concurrent_execution: bool,
}

impl MaintenanceTaskGroup {
    pub fn new(tasks: Vec<MaintenanceTask>, allows_concurrent_execution: bool) -> Self {
        Self {
            tasks,
            allows_concurrent_execution,
        }
    }

    pub fn singleton(task: MaintenanceTask) -> Self {
        Self::new(vec![task], false)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, task: MaintenanceTask) -> bool {
        self.tasks.contains(&task)
    }
}

impl fmt::Display for MaintenanceTaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.tasks.iter().map(MaintenanceTask::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
