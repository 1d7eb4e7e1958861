//! Maintenance task planning.
//!
//! Partitions a requested task set into ordered groups. Each group is bounded
//! by the CPU and memory ceilings and respects the dependency DAG. Critical
//! tasks always run alone.
//!
//! The pass is a first-fit packing over tasks sorted by priority, then by
//! task declaration order. It is deterministic, not optimal.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::domain::errors::ConfigurationError;
use crate::domain::models::{MaintenanceTask, MaintenanceTaskGroup, SchedulerConfig, TaskConfiguration};
use crate::domain::ports::ResourceProbe;
use crate::services::dependency_resolver::DependencyResolver;

/// Aggregate resource needs of a task group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupRequirements {
    pub cpu_intensity: u32,
    pub memory_mb: u64,
}

/// Plans task groups from static task configurations.
pub struct TaskScheduler {
    configurations: HashMap<MaintenanceTask, TaskConfiguration>,
    limits: SchedulerConfig,
    probe: Arc<dyn ResourceProbe>,
}

impl TaskScheduler {
    /// Create a scheduler over a complete configuration set.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if a task has no configuration, a
    /// dependency is unknown or cyclic, a duration estimate is zero, or a
    /// single task needs more CPU or memory than a group may ever hold.
    pub fn new(
        configurations: HashMap<MaintenanceTask, TaskConfiguration>,
        limits: SchedulerConfig,
        probe: Arc<dyn ResourceProbe>,
    ) -> Result<Self, ConfigurationError> {
        if let Some(&task) = MaintenanceTask::ALL
            .iter()
            .find(|task| !configurations.contains_key(task))
        {
            return Err(ConfigurationError::MissingConfiguration(task));
        }

        DependencyResolver::new().validate(&configurations)?;

        let mut ordered: Vec<&TaskConfiguration> = configurations.values().collect();
        ordered.sort_by_key(|config| config.task);
        for config in ordered {
            // The group deadline is derived from the estimate.
            if config.estimated_duration_ms == 0 {
                return Err(ConfigurationError::ZeroEstimate(config.task));
            }
            if u32::from(config.cpu_intensity) > limits.max_group_cpu {
                return Err(ConfigurationError::ExceedsGroupCeiling {
                    task: config.task,
                    reason: format!(
                        "cpu intensity {} above ceiling {}",
                        config.cpu_intensity, limits.max_group_cpu
                    ),
                });
            }
            if config.max_memory_mb > limits.max_group_memory_mb {
                return Err(ConfigurationError::ExceedsGroupCeiling {
                    task: config.task,
                    reason: format!(
                        "memory {}MB above ceiling {}MB",
                        config.max_memory_mb, limits.max_group_memory_mb
                    ),
                });
            }
        }

        Ok(Self {
            configurations,
            limits,
            probe,
        })
    }

    /// Scheduler over the built-in task catalogue.
    pub fn with_defaults(
        limits: SchedulerConfig,
        probe: Arc<dyn ResourceProbe>,
    ) -> Result<Self, ConfigurationError> {
        Self::new(TaskConfiguration::defaults(), limits, probe)
    }

    pub fn configuration(&self, task: MaintenanceTask) -> Option<&TaskConfiguration> {
        self.configurations.get(&task)
    }

    pub fn configurations(&self) -> &HashMap<MaintenanceTask, TaskConfiguration> {
        &self.configurations
    }

    pub fn limits(&self) -> &SchedulerConfig {
        &self.limits
    }

    /// Partition `requested` into ordered execution groups.
    ///
    /// A task whose dependencies (within `requested`) have not been placed in
    /// an earlier, closed group is deferred to a later pass. Dependencies
    /// outside `requested` count as satisfied.
    pub fn schedule_tasks(&self, requested: &BTreeSet<MaintenanceTask>) -> Vec<MaintenanceTaskGroup> {
        let mut pending: Vec<&TaskConfiguration> = requested
            .iter()
            .filter_map(|task| self.configurations.get(task))
            .collect();
        pending.sort_by_key(|config| (config.priority, config.task));

        let mut planner = Planner::new(&self.limits);

        while !pending.is_empty() {
            let mut deferred = Vec::new();
            let mut progressed = false;

            for config in pending {
                let ready = config
                    .dependencies
                    .iter()
                    .all(|dep| !requested.contains(dep) || planner.completed.contains(dep));
                if !ready {
                    deferred.push(config);
                    continue;
                }

                progressed = true;
                planner.place(config);
            }
            planner.close();

            if !progressed {
                let stuck: Vec<&str> = deferred.iter().map(|c| c.task.as_str()).collect();
                error!(tasks = ?stuck, "Unable to place tasks with unsatisfied dependencies");
                break;
            }
            pending = deferred;
        }

        debug!(
            requested = requested.len(),
            groups = planner.groups.len(),
            "Planned maintenance task groups"
        );
        planner.groups
    }

    /// Serial members stack; concurrent members overlap, so the slowest one
    /// dominates.
    pub fn estimate_group_duration(&self, group: &MaintenanceTaskGroup) -> Duration {
        let mut serial = Duration::ZERO;
        let mut parallel = Duration::ZERO;

        for config in group.tasks.iter().filter_map(|t| self.configurations.get(t)) {
            if config.allows_concurrent_execution {
                parallel = parallel.max(config.estimated_duration());
            } else {
                serial += config.estimated_duration();
            }
        }

        serial + parallel
    }

    pub fn group_requirements(&self, group: &MaintenanceTaskGroup) -> GroupRequirements {
        group
            .tasks
            .iter()
            .filter_map(|t| self.configurations.get(t))
            .fold(GroupRequirements::default(), |acc, config| GroupRequirements {
                cpu_intensity: acc.cpu_intensity + u32::from(config.cpu_intensity),
                memory_mb: acc.memory_mb + config.max_memory_mb,
            })
    }

    /// Why `group` cannot run right now, or `None` if it can.
    pub fn blocking_reason(&self, group: &MaintenanceTaskGroup) -> Option<String> {
        let needs = self.group_requirements(group);

        if needs.cpu_intensity > self.limits.max_group_cpu {
            return Some(format!(
                "group cpu {} above ceiling {}",
                needs.cpu_intensity, self.limits.max_group_cpu
            ));
        }
        if needs.memory_mb > self.limits.max_group_memory_mb {
            return Some(format!(
                "group memory {}MB above ceiling {}MB",
                needs.memory_mb, self.limits.max_group_memory_mb
            ));
        }

        let snapshot = self.probe.snapshot();
        if snapshot.available_memory_mb < needs.memory_mb {
            return Some(format!(
                "{}MB available, group needs {}MB",
                snapshot.available_memory_mb, needs.memory_mb
            ));
        }
        if snapshot.cpu_load_percent > self.limits.max_system_load_percent {
            return Some(format!(
                "system load {:.1}% above {:.1}%",
                snapshot.cpu_load_percent, self.limits.max_system_load_percent
            ));
        }

        None
    }

    /// Whether `group` fits both the configured ceilings and the live
    /// resource snapshot.
    pub fn can_run_task_group(&self, group: &MaintenanceTaskGroup) -> bool {
        match self.blocking_reason(group) {
            Some(reason) => {
                debug!(group = %group, reason = %reason, "Task group cannot run now");
                false
            }
            None => true,
        }
    }
}

/// Mutable state of one planning run.
struct Planner<'a> {
    limits: &'a SchedulerConfig,
    open: Vec<&'a TaskConfiguration>,
    cpu: u32,
    memory_mb: u64,
    completed: BTreeSet<MaintenanceTask>,
    groups: Vec<MaintenanceTaskGroup>,
}

impl<'a> Planner<'a> {
    fn new(limits: &'a SchedulerConfig) -> Self {
        Self {
            limits,
            open: Vec::new(),
            cpu: 0,
            memory_mb: 0,
            completed: BTreeSet::new(),
            groups: Vec::new(),
        }
    }

    fn place(&mut self, config: &'a TaskConfiguration) {
        if config.priority.is_critical() {
            self.close();
            self.push(config);
            self.close();
            return;
        }

        if !self.open.is_empty() && !self.fits(config) {
            self.close();
        }
        self.push(config);
    }

    fn fits(&self, config: &TaskConfiguration) -> bool {
        config.allows_concurrent_execution
            && self.open.iter().all(|c| c.allows_concurrent_execution)
            && self.cpu + u32::from(config.cpu_intensity) <= self.limits.max_group_cpu
            && self.memory_mb + config.max_memory_mb <= self.limits.max_group_memory_mb
    }

    fn push(&mut self, config: &'a TaskConfiguration) {
        self.cpu += u32::from(config.cpu_intensity);
        self.memory_mb += config.max_memory_mb;
        self.open.push(config);
    }

    fn close(&mut self) {
        if self.open.is_empty() {
            return;
        }

        let members = std::mem::take(&mut self.open);
        let concurrent = members.iter().all(|c| c.allows_concurrent_execution);
        let tasks: Vec<MaintenanceTask> = members.iter().map(|c| c.task).collect();
        self.completed.extend(tasks.iter().copied());
        self.groups.push(MaintenanceTaskGroup::new(tasks, concurrent));
        self.cpu = 0;
        self.memory_mb = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskPriority;
    use crate::domain::ports::ResourceSnapshot;
    use MaintenanceTask::*;

    struct FixedProbe(ResourceSnapshot);

    impl ResourceProbe for FixedProbe {
        fn snapshot(&self) -> ResourceSnapshot {
            self.0
        }
    }

    fn roomy() -> Arc<dyn ResourceProbe> {
        Arc::new(FixedProbe(ResourceSnapshot {
            available_memory_mb: 64 * 1024,
            cpu_load_percent: 5.0,
        }))
    }

    fn scheduler() -> TaskScheduler {
        TaskScheduler::with_defaults(SchedulerConfig::default(), roomy()).unwrap()
    }

    fn plan(scheduler: &TaskScheduler, tasks: &[MaintenanceTask]) -> Vec<Vec<MaintenanceTask>> {
        scheduler
            .schedule_tasks(&tasks.iter().copied().collect())
            .into_iter()
            .map(|g| g.tasks)
            .collect()
    }

    #[test]
    fn test_health_check_prune_check_integrity() {
        let groups = plan(&scheduler(), &[HealthCheck, Prune, CheckIntegrity]);
        assert_eq!(
            groups,
            vec![vec![HealthCheck], vec![CheckIntegrity], vec![Prune]]
        );
    }

    #[test]
    fn test_full_catalogue_plan() {
        let groups = plan(&scheduler(), &MaintenanceTask::ALL);
        assert_eq!(
            groups,
            vec![
                vec![HealthCheck],
                vec![CheckIntegrity],
                vec![Prune],
                vec![RemoveStaleSnapshots],
                vec![RebuildIndex],
            ]
        );
    }

    #[test]
    fn test_concurrent_tasks_share_a_group() {
        let groups = plan(&scheduler(), &[CheckIntegrity, RemoveStaleSnapshots]);
        assert_eq!(groups, vec![vec![CheckIntegrity, RemoveStaleSnapshots]]);
    }

    #[test]
    fn test_group_ceiling_splits_concurrent_tasks() {
        let limits = SchedulerConfig {
            max_group_memory_mb: 2048,
            ..SchedulerConfig::default()
        };
        let scheduler = TaskScheduler::with_defaults(limits, roomy()).unwrap();
        let groups = plan(&scheduler, &[CheckIntegrity, RemoveStaleSnapshots]);
        assert_eq!(groups, vec![vec![CheckIntegrity], vec![RemoveStaleSnapshots]]);
    }

    #[test]
    fn test_unrequested_dependency_is_satisfied() {
        let groups = plan(&scheduler(), &[RebuildIndex]);
        assert_eq!(groups, vec![vec![RebuildIndex]]);
    }

    #[test]
    fn test_critical_task_is_isolated() {
        let mut configs = TaskConfiguration::defaults();
        configs.insert(
            RemoveStaleSnapshots,
            configs[&RemoveStaleSnapshots]
                .clone()
                .with_dependencies(Vec::new())
                .with_priority(TaskPriority::Critical),
        );
        let scheduler = TaskScheduler::new(configs, SchedulerConfig::default(), roomy()).unwrap();

        for group in scheduler.schedule_tasks(&MaintenanceTask::ALL.into_iter().collect()) {
            if group.contains(HealthCheck) || group.contains(RemoveStaleSnapshots) {
                assert_eq!(group.len(), 1, "critical task shared {group}");
            }
        }
    }

    #[test]
    fn test_planning_is_deterministic() {
        let scheduler = scheduler();
        let requested: BTreeSet<_> = MaintenanceTask::ALL.into_iter().collect();
        assert_eq!(scheduler.schedule_tasks(&requested), scheduler.schedule_tasks(&requested));
    }

    #[test]
    fn test_empty_request_plans_nothing() {
        assert!(scheduler().schedule_tasks(&BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_estimate_group_duration() {
        let scheduler = scheduler();
        let parallel = MaintenanceTaskGroup::new(vec![CheckIntegrity, RemoveStaleSnapshots], true);
        assert_eq!(scheduler.estimate_group_duration(&parallel), Duration::from_secs(60 * 60));

        let mixed = MaintenanceTaskGroup::new(vec![Prune, RebuildIndex, RemoveStaleSnapshots], false);
        assert_eq!(
            scheduler.estimate_group_duration(&mixed),
            Duration::from_secs((45 + 20 + 10) * 60)
        );
    }

    #[test]
    fn test_can_run_task_group_checks_live_snapshot() {
        let group = MaintenanceTaskGroup::singleton(Prune);
        assert!(scheduler().can_run_task_group(&group));

        let starved = Arc::new(FixedProbe(ResourceSnapshot {
            available_memory_mb: 1024,
            cpu_load_percent: 5.0,
        }));
        let scheduler = TaskScheduler::with_defaults(SchedulerConfig::default(), starved).unwrap();
        assert!(!scheduler.can_run_task_group(&group));

        let busy = Arc::new(FixedProbe(ResourceSnapshot {
            available_memory_mb: 64 * 1024,
            cpu_load_percent: 99.0,
        }));
        let scheduler = TaskScheduler::with_defaults(SchedulerConfig::default(), busy).unwrap();
        assert!(scheduler.blocking_reason(&group).unwrap().contains("system load"));
    }

    #[test]
    fn test_can_run_task_group_checks_ceilings() {
        let group = MaintenanceTaskGroup::new(vec![Prune, CheckIntegrity], false);
        let reason = scheduler().blocking_reason(&group).unwrap();
        assert!(reason.contains("cpu"), "{reason}");
    }

    #[test]
    fn test_new_rejects_cycles() {
        let mut configs = TaskConfiguration::defaults();
        configs.insert(HealthCheck, configs[&HealthCheck].clone().with_dependencies([RebuildIndex]));
        assert!(matches!(
            TaskScheduler::new(configs, SchedulerConfig::default(), roomy()),
            Err(ConfigurationError::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_new_rejects_missing_and_oversized_tasks() {
        let mut configs = TaskConfiguration::defaults();
        configs.remove(&Prune);
        assert!(matches!(
            TaskScheduler::new(configs, SchedulerConfig::default(), roomy()),
            Err(ConfigurationError::MissingConfiguration(Prune))
        ));

        let limits = SchedulerConfig {
            max_group_memory_mb: 1024,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            TaskScheduler::with_defaults(limits, roomy()),
            Err(ConfigurationError::ExceedsGroupCeiling { task: Prune, .. })
        ));
    }

    #[test]
    fn test_new_rejects_zero_estimate() {
        let mut configs = TaskConfiguration::defaults();
        configs.insert(
            RemoveStaleSnapshots,
            configs[&RemoveStaleSnapshots]
                .clone()
                .with_estimated_duration(Duration::ZERO),
        );

        assert!(matches!(
            TaskScheduler::new(configs, SchedulerConfig::default(), roomy()),
            Err(ConfigurationError::ZeroEstimate(RemoveStaleSnapshots))
        ));
    }
}
