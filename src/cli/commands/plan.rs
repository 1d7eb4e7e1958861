//! Show how a task set would be grouped and whether each group can run now.

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::Cell;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::schedule::parse_tasks;
use crate::cli::context::{resolve_repository, AppContext};
use crate::cli::output::table::{flag_cell, list_table};
use crate::cli::output::{format_duration, output, CommandOutput};
use crate::domain::models::MaintenanceTask;
use crate::domain::ports::ConfigStore;
use crate::services::{DependencyResolver, SystemResourceProbe, TaskScheduler, GROUP_TIMEOUT_FACTOR};

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Repository whose scheduled tasks to plan
    pub repository: Option<PathBuf>,

    /// Plan these tasks instead (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub tasks: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PlannedTaskOutput {
    pub task: MaintenanceTask,
    pub priority: String,
    pub dependency_depth: u32,
}

#[derive(Debug, Serialize)]
pub struct PlannedGroupOutput {
    pub index: usize,
    pub tasks: Vec<PlannedTaskOutput>,
    pub concurrent: bool,
    pub estimated_secs: u64,
    pub timeout_secs: u64,
    pub cpu_intensity: u32,
    pub memory_mb: u64,
    pub runnable: bool,
    pub blocked_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlanOutput {
    pub repository: Option<String>,
    pub budget_minutes: Option<u32>,
    pub estimated_total_secs: u64,
    pub groups: Vec<PlannedGroupOutput>,
}

impl CommandOutput for PlanOutput {
    fn to_human(&self) -> String {
        if self.groups.is_empty() {
            return "Nothing to plan.".to_string();
        }

        let mut table = list_table(&["group", "tasks", "mode", "estimate", "timeout", "cpu", "memory", "runnable"]);
        for group in &self.groups {
            let tasks: Vec<String> = group
                .tasks
                .iter()
                .map(|t| format!("{} ({}, depth {})", t.task, t.priority, t.dependency_depth))
                .collect();
            table.add_row(vec![
                Cell::new(group.index),
                Cell::new(tasks.join("\n")),
                Cell::new(if group.concurrent { "concurrent" } else { "serial" }),
                Cell::new(format_duration(Duration::from_secs(group.estimated_secs))),
                Cell::new(format_duration(Duration::from_secs(group.timeout_secs))),
                Cell::new(group.cpu_intensity),
                Cell::new(format!("{}MB", group.memory_mb)),
                flag_cell(group.runnable),
            ]);
        }

        let mut lines = Vec::new();
        if let Some(ref repository) = self.repository {
            lines.push(format!("Repository: {repository}"));
        }
        lines.push(table.to_string());
        lines.push(String::new());
        let total = format_duration(Duration::from_secs(self.estimated_total_secs));
        match self.budget_minutes {
            Some(budget) => lines.push(format!("Estimated total: {total} (budget {budget}m)")),
            None => lines.push(format!("Estimated total: {total}")),
        }
        for group in &self.groups {
            if let Some(ref reason) = group.blocked_by {
                lines.push(format!("Group {} blocked: {}", group.index, reason));
            }
        }

        lines.join("\n")
    }
}

/// Plan `requested` and describe every group.
pub fn build_plan(scheduler: &TaskScheduler, requested: &BTreeSet<MaintenanceTask>) -> Result<Vec<PlannedGroupOutput>> {
    let resolver = DependencyResolver::new();
    let mut groups = Vec::new();

    for (index, group) in scheduler.schedule_tasks(requested).iter().enumerate() {
        let mut tasks = Vec::with_capacity(group.len());
        for &task in &group.tasks {
            let priority = scheduler
                .configuration(task)
                .map_or_else(|| "unknown".to_string(), |c| c.priority.to_string());
            let dependency_depth = resolver
                .calculate_depth(task, scheduler.configurations())
                .context("Invalid task dependencies")?;
            tasks.push(PlannedTaskOutput {
                task,
                priority,
                dependency_depth,
            });
        }

        let estimate = scheduler.estimate_group_duration(group);
        let needs = scheduler.group_requirements(group);
        let blocked_by = scheduler.blocking_reason(group);

        groups.push(PlannedGroupOutput {
            index: index + 1,
            tasks,
            concurrent: group.allows_concurrent_execution,
            estimated_secs: estimate.as_secs(),
            timeout_secs: estimate.mul_f64(GROUP_TIMEOUT_FACTOR).as_secs(),
            cpu_intensity: needs.cpu_intensity,
            memory_mb: needs.memory_mb,
            runnable: blocked_by.is_none(),
            blocked_by,
        });
    }

    Ok(groups)
}

pub async fn execute(args: PlanArgs, context: &AppContext, json_mode: bool) -> Result<()> {
    let scheduler = context.scheduler(Arc::new(SystemResourceProbe::new())).await?;

    let (repository, budget_minutes, requested) = match args.repository {
        Some(ref path) if args.tasks.is_empty() => {
            let repository = resolve_repository(path)?;
            let schedules = context.store.load_schedules().await.context("Failed to load schedules")?;
            let schedule = schedules
                .get(&repository)
                .with_context(|| format!("No schedule for {}", repository.display()))?;
            (
                Some(repository.display().to_string()),
                Some(schedule.max_duration_minutes),
                schedule.tasks.clone(),
            )
        }
        ref path => {
            let repository = path.as_deref().map(resolve_repository).transpose()?;
            (
                repository.map(|r| r.display().to_string()),
                None,
                parse_tasks(&args.tasks)?,
            )
        }
    };

    let groups = build_plan(&scheduler, &requested)?;
    let out = PlanOutput {
        repository,
        budget_minutes,
        estimated_total_secs: groups.iter().map(|g| g.estimated_secs).sum(),
        groups,
    };
    output(&out, json_mode);
    Ok(())
}
