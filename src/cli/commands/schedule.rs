//! Schedule CLI commands for managing per-repository maintenance schedules.

use anyhow::{Context, Result};
use chrono::{NaiveTime, Timelike};
use clap::{Args, Subcommand};
use comfy_table::Cell;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::history::RunResultOutput;
use crate::cli::context::{resolve_repository, AppContext};
use crate::cli::output::table::{flag_cell, list_table, outcome_cell, render_list};
use crate::cli::output::{format_local, output, CommandOutput};
use crate::domain::models::{MaintenanceSchedule, MaintenanceTask, ScheduleDay};
use crate::domain::ports::ConfigStore;

/// Runs shown under `schedule show`.
const RECENT_RUNS_SHOWN: usize = 5;

#[derive(Args, Debug)]
pub struct ScheduleArgs {
    #[command(subcommand)]
    pub command: ScheduleCommands,
}

#[derive(Subcommand, Debug)]
pub enum ScheduleCommands {
    /// Create or replace a repository's schedule
    Set {
        /// Repository path
        repository: PathBuf,

        /// Days to run on (comma-separated: mon,thu or "daily")
        #[arg(long, value_delimiter = ',', required = true)]
        days: Vec<String>,

        /// Local trigger time (HH:MM)
        #[arg(long, default_value = "03:00")]
        at: String,

        /// Budget for a whole run, in minutes (minimum 30)
        #[arg(long, default_value = "120")]
        max_duration: u32,

        /// Tasks to run (comma-separated); all tasks when omitted
        #[arg(long, value_delimiter = ',')]
        tasks: Vec<String>,

        /// Store the schedule disabled
        #[arg(long)]
        disabled: bool,
    },

    /// List all schedules
    List,

    /// Show a repository's schedule and recent runs
    Show {
        /// Repository path
        repository: PathBuf,
    },

    /// Remove a repository's schedule
    Remove {
        /// Repository path
        repository: PathBuf,
    },
}

// -- Output structs --

#[derive(Debug, Serialize)]
pub struct ScheduleOutput {
    pub repository: String,
    pub trigger: String,
    pub days: Vec<ScheduleDay>,
    pub hour: u8,
    pub minute: u8,
    pub enabled: bool,
    pub max_duration_minutes: u32,
    pub tasks: Vec<MaintenanceTask>,
    pub last_run: Option<chrono::DateTime<chrono::Utc>>,
}

impl ScheduleOutput {
    fn new(
        repository: String,
        schedule: &MaintenanceSchedule,
        last_run: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Self {
        Self {
            repository,
            trigger: schedule.description(),
            days: schedule.days.iter().copied().collect(),
            hour: schedule.hour,
            minute: schedule.minute,
            enabled: schedule.enabled,
            max_duration_minutes: schedule.max_duration_minutes,
            tasks: schedule.tasks.iter().copied().collect(),
            last_run,
        }
    }

    fn task_names(&self) -> String {
        self.tasks
            .iter()
            .map(MaintenanceTask::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn last_run_display(&self) -> String {
        self.last_run.map_or_else(|| "never".to_string(), format_local)
    }
}

#[derive(Debug, Serialize)]
pub struct ScheduleListOutput {
    pub schedules: Vec<ScheduleOutput>,
    pub total: usize,
}

impl CommandOutput for ScheduleListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["repository", "trigger", "enabled", "budget", "tasks", "last run"]);
        for s in &self.schedules {
            table.add_row(vec![
                Cell::new(&s.repository),
                Cell::new(&s.trigger),
                flag_cell(s.enabled),
                Cell::new(format!("{}m", s.max_duration_minutes)),
                Cell::new(s.task_names()),
                Cell::new(s.last_run_display()),
            ]);
        }
        render_list("schedule", &table, self.total)
    }
}

#[derive(Debug, Serialize)]
pub struct ScheduleDetailOutput {
    pub schedule: ScheduleOutput,
    pub recent_runs: Vec<RunResultOutput>,
}

impl CommandOutput for ScheduleDetailOutput {
    fn to_human(&self) -> String {
        let s = &self.schedule;
        let mut lines = vec![
            format!("Repository: {}", s.repository),
            format!("Trigger: {}", s.trigger),
            format!("Enabled: {}", if s.enabled { "yes" } else { "no" }),
            format!("Budget: {} minutes", s.max_duration_minutes),
            format!("Tasks: {}", s.task_names()),
            format!("Last Run: {}", s.last_run_display()),
        ];

        if !self.recent_runs.is_empty() {
            let mut table = list_table(&["started", "outcome", "failed"]);
            for run in &self.recent_runs {
                table.add_row(vec![
                    Cell::new(format_local(run.started_at)),
                    outcome_cell(run.outcome),
                    Cell::new(run.failed.keys().cloned().collect::<Vec<_>>().join(", ")),
                ]);
            }
            lines.push(String::new());
            lines.push("Recent Runs:".to_string());
            lines.push(table.to_string());
        }

        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ScheduleActionOutput {
    pub success: bool,
    pub message: String,
}

impl CommandOutput for ScheduleActionOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }
}

// -- Parsing --

/// Parse day names; `daily` expands to every day.
pub fn parse_days(values: &[String]) -> Result<BTreeSet<ScheduleDay>> {
    let mut days = BTreeSet::new();
    for value in values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
        if value.eq_ignore_ascii_case("daily") {
            days.extend(ScheduleDay::ALL);
            continue;
        }
        let day = ScheduleDay::from_str(value).with_context(|| format!("Unknown day: {value}"))?;
        days.insert(day);
    }
    if days.is_empty() {
        anyhow::bail!("At least one day is required");
    }
    Ok(days)
}

/// Parse task names; an empty list selects every task.
pub fn parse_tasks(values: &[String]) -> Result<BTreeSet<MaintenanceTask>> {
    let mut tasks = BTreeSet::new();
    for value in values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
        let task = MaintenanceTask::from_str(value).with_context(|| format!("Unknown task: {value}"))?;
        tasks.insert(task);
    }
    if tasks.is_empty() {
        tasks.extend(MaintenanceTask::ALL);
    }
    Ok(tasks)
}

/// Parse a `HH:MM` trigger time.
pub fn parse_time(value: &str) -> Result<(u8, u8)> {
    let time = NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .with_context(|| format!("Invalid time '{value}'. Use HH:MM (e.g., 03:30)"))?;
    let hour = u8::try_from(time.hour()).context("Hour out of range")?;
    let minute = u8::try_from(time.minute()).context("Minute out of range")?;
    Ok((hour, minute))
}

// -- Execute --

pub async fn execute(args: ScheduleArgs, context: &AppContext, json_mode: bool) -> Result<()> {
    let store = &context.store;

    match args.command {
        ScheduleCommands::Set {
            repository,
            days,
            at,
            max_duration,
            tasks,
            disabled,
        } => {
            let repository = resolve_repository(&repository)?;
            let (hour, minute) = parse_time(&at)?;
            let mut schedule =
                MaintenanceSchedule::new(parse_days(&days)?, hour, minute, max_duration, parse_tasks(&tasks)?);
            if disabled {
                schedule = schedule.disabled();
            }

            store
                .save_schedule(&repository, &schedule)
                .await
                .context("Failed to save schedule")?;

            let out = ScheduleActionOutput {
                success: true,
                message: format!(
                    "Schedule saved for {}: {}{}",
                    repository.display(),
                    schedule.description(),
                    if schedule.enabled { "" } else { " (disabled)" }
                ),
            };
            output(&out, json_mode);
        }

        ScheduleCommands::List => {
            let schedules = store.load_schedules().await.context("Failed to load schedules")?;
            let last_runs = store.load_last_runs().await.context("Failed to load last runs")?;

            let mut entries: Vec<_> = schedules.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let out = ScheduleListOutput {
                total: entries.len(),
                schedules: entries
                    .iter()
                    .map(|(repo, schedule)| {
                        ScheduleOutput::new(repo.display().to_string(), schedule, last_runs.get(repo).copied())
                    })
                    .collect(),
            };
            output(&out, json_mode);
        }

        ScheduleCommands::Show { repository } => {
            let repository = resolve_repository(&repository)?;
            let schedules = store.load_schedules().await.context("Failed to load schedules")?;
            let schedule = schedules
                .get(&repository)
                .with_context(|| format!("No schedule for {}", repository.display()))?;
            let last_run = store
                .load_last_runs()
                .await
                .context("Failed to load last runs")?
                .get(&repository)
                .copied();
            let recent = store
                .recent_results(&repository, RECENT_RUNS_SHOWN)
                .await
                .context("Failed to load run history")?;

            let out = ScheduleDetailOutput {
                schedule: ScheduleOutput::new(repository.display().to_string(), schedule, last_run),
                recent_runs: recent.iter().map(RunResultOutput::from).collect(),
            };
            output(&out, json_mode);
        }

        ScheduleCommands::Remove { repository } => {
            let repository = resolve_repository(&repository)?;
            let removed = store
                .delete_schedule(&repository)
                .await
                .context("Failed to remove schedule")?;
            if !removed {
                anyhow::bail!("No schedule for {}", repository.display());
            }

            let out = ScheduleActionOutput {
                success: true,
                message: format!("Schedule removed: {}", repository.display()),
            };
            output(&out, json_mode);
        }
    }

    Ok(())
}
