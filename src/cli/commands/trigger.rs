//! Manual maintenance run.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use super::history::RunResultOutput;
use crate::cli::context::{resolve_repository, AppContext};
use crate::cli::output::output;
use crate::cli::output::progress::{create_spinner, ProgressBarExt};
use crate::domain::models::RunOutcome;
use crate::services::SystemResourceProbe;

#[derive(Args, Debug)]
pub struct TriggerArgs {
    /// Repository path; must have a schedule
    pub repository: PathBuf,
}

pub async fn execute(args: TriggerArgs, context: &AppContext, json_mode: bool) -> Result<()> {
    let repository = resolve_repository(&args.repository)?;
    let orchestrator = context.orchestrator(Arc::new(SystemResourceProbe::new())).await?;

    let spinner = create_spinner(format!("Maintaining {}", repository.display()), json_mode);
    let result = match orchestrator.trigger_maintenance(&repository).await {
        Ok(result) => result,
        Err(e) => {
            spinner.finish_error("Maintenance not started");
            return Err(e).with_context(|| format!("Failed to trigger maintenance for {}", repository.display()));
        }
    };

    let outcome = result.outcome();
    if outcome == RunOutcome::Completed {
        spinner.finish_success(format!("{} tasks completed", result.completed.len()));
    } else {
        spinner.finish_error(format!("Maintenance {outcome}"));
    }

    output(&RunResultOutput::from(&result), json_mode);

    if outcome != RunOutcome::Completed {
        anyhow::bail!("Maintenance run for {} {}", repository.display(), outcome);
    }
    Ok(())
}
