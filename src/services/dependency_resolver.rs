use crate::domain::errors::ConfigurationError;
use crate::domain::models::{MaintenanceTask, TaskConfiguration};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Service for validating task dependencies and detecting circular dependencies
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver;

// Standalone helper for cycle detection (no self needed)
fn detect_cycle_util(
    node: MaintenanceTask,
    graph: &BTreeMap<MaintenanceTask, BTreeSet<MaintenanceTask>>,
    visited: &mut BTreeSet<MaintenanceTask>,
    rec_stack: &mut BTreeSet<MaintenanceTask>,
    path: &mut Vec<MaintenanceTask>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(&node) {
        for &neighbor in neighbors {
            if !visited.contains(&neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(&neighbor) {
                // Keep only the cycle itself, closed on its first node
                if let Some(cycle_start) = path.iter().position(|&t| t == neighbor) {
                    path.drain(0..cycle_start);
                    path.push(neighbor);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(&node);
    path.pop();
    false
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Validate that every dependency of `config` is itself configured
    pub fn validate_dependencies(
        &self,
        config: &TaskConfiguration,
        available: &HashMap<MaintenanceTask, TaskConfiguration>,
    ) -> Result<(), ConfigurationError> {
        match config
            .dependencies
            .iter()
            .find(|dep| !available.contains_key(dep))
        {
            Some(&dependency) => Err(ConfigurationError::UnknownDependency {
                task: config.task,
                dependency,
            }),
            None => Ok(()),
        }
    }

    /// Detect circular dependencies among task configurations.
    ///
    /// Returns the cycle as a path that starts and ends on the same task.
    /// Traversal order is deterministic, so the same configuration always
    /// reports the same cycle.
    pub fn detect_cycle(
        &self,
        configs: &HashMap<MaintenanceTask, TaskConfiguration>,
    ) -> Option<Vec<MaintenanceTask>> {
        let graph: BTreeMap<MaintenanceTask, BTreeSet<MaintenanceTask>> = configs
            .iter()
            .map(|(&task, config)| (task, config.dependencies.clone()))
            .collect();

        // DFS-based cycle detection
        let mut visited = BTreeSet::new();
        let mut rec_stack = BTreeSet::new();
        let mut path = Vec::new();

        for &task in graph.keys() {
            if !visited.contains(&task)
                && detect_cycle_util(task, &graph, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(path);
            }
        }

        None
    }

    /// Validate a whole configuration set: no dangling dependencies, no cycles
    pub fn validate(
        &self,
        configs: &HashMap<MaintenanceTask, TaskConfiguration>,
    ) -> Result<(), ConfigurationError> {
        let mut ordered: Vec<&TaskConfiguration> = configs.values().collect();
        ordered.sort_by_key(|config| config.task);
        for config in ordered {
            self.validate_dependencies(config, configs)?;
        }

        match self.detect_cycle(configs) {
            Some(cycle) => Err(ConfigurationError::DependencyCycle(cycle)),
            None => Ok(()),
        }
    }

    /// Calculate the dependency depth for a task
    /// Returns the maximum depth in the dependency chain
    pub fn calculate_depth(
        &self,
        task: MaintenanceTask,
        configs: &HashMap<MaintenanceTask, TaskConfiguration>,
    ) -> Result<u32, ConfigurationError> {
        let mut visited = Vec::new();
        calculate_depth_recursive(task, configs, &mut visited)
    }
}

// Standalone helper for depth calculation
fn calculate_depth_recursive(
    task: MaintenanceTask,
    configs: &HashMap<MaintenanceTask, TaskConfiguration>,
    visited: &mut Vec<MaintenanceTask>,
) -> Result<u32, ConfigurationError> {
    if visited.contains(&task) {
        let mut cycle = visited.clone();
        cycle.push(task);
        return Err(ConfigurationError::DependencyCycle(cycle));
    }

    visited.push(task);

    let mut max_depth = 0;
    if let Some(config) = configs.get(&task) {
        for &dep in &config.dependencies {
            if configs.contains_key(&dep) {
                max_depth = max_depth.max(calculate_depth_recursive(dep, configs, visited)? + 1);
            }
        }
    }

    visited.pop();
    Ok(max_depth)
}
