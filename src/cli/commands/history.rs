//! Run history commands.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use comfy_table::Cell;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::context::{resolve_repository, AppContext};
use crate::cli::output::table::{list_table, outcome_cell, render_list};
use crate::cli::output::{format_duration, format_local, output, truncate, CommandOutput};
use crate::domain::models::{MaintenanceResult, RunOutcome};
use crate::domain::ports::ConfigStore;

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Repository path
    pub repository: PathBuf,

    /// Maximum number of runs to display
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}

/// One finished run, as shown to the user.
#[derive(Debug, Serialize)]
pub struct RunResultOutput {
    pub id: String,
    pub repository: String,
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub completed: Vec<String>,
    pub failed: BTreeMap<String, String>,
}

impl From<&MaintenanceResult> for RunResultOutput {
    fn from(result: &MaintenanceResult) -> Self {
        Self {
            id: result.id.to_string(),
            repository: result.repository.display().to_string(),
            outcome: result.outcome(),
            started_at: result.started_at,
            finished_at: result.finished_at,
            duration_secs: result.duration().to_std().unwrap_or_default().as_secs(),
            completed: result.completed.iter().map(ToString::to_string).collect(),
            failed: result
                .failed
                .iter()
                .map(|(task, cause)| (task.to_string(), cause.to_string()))
                .collect(),
        }
    }
}

impl CommandOutput for RunResultOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Repository: {}", self.repository),
            format!("Outcome: {}", self.outcome),
            format!("Run ID: {}", self.id),
            format!("Started: {}", format_local(self.started_at)),
            format!("Duration: {}", format_duration(Duration::from_secs(self.duration_secs))),
        ];

        if !self.completed.is_empty() {
            lines.push(format!("Completed: {}", self.completed.join(", ")));
        }
        if !self.failed.is_empty() {
            lines.push("Failed:".to_string());
            for (task, cause) in &self.failed {
                lines.push(format!("  {task}: {cause}"));
            }
        }

        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryOutput {
    pub repository: String,
    pub runs: Vec<RunResultOutput>,
}

impl CommandOutput for HistoryOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["started", "outcome", "duration", "completed", "failed"]);
        for run in &self.runs {
            let failed: Vec<&str> = run.failed.keys().map(String::as_str).collect();
            table.add_row(vec![
                Cell::new(format_local(run.started_at)),
                outcome_cell(run.outcome),
                Cell::new(format_duration(Duration::from_secs(run.duration_secs))),
                Cell::new(truncate(&run.completed.join(","), 50)),
                Cell::new(truncate(&failed.join(","), 40)),
            ]);
        }
        render_list("run", &table, self.runs.len())
    }
}

pub async fn execute(args: HistoryArgs, context: &AppContext, json_mode: bool) -> Result<()> {
    let repository = resolve_repository(&args.repository)?;
    let results = context
        .store
        .recent_results(&repository, args.limit)
        .await
        .context("Failed to load run history")?;

    let out = HistoryOutput {
        repository: repository.display().to_string(),
        runs: results.iter().map(RunResultOutput::from).collect(),
    };
    output(&out, json_mode);
    Ok(())
}
