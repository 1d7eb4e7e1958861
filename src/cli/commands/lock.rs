//! Inspect and break repository locks.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use comfy_table::{presets, Cell, Table};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::context::{resolve_repository, AppContext};
use crate::cli::output::table::flag_cell;
use crate::cli::output::{format_duration, format_local, output, CommandOutput};
use crate::domain::models::LockInfo;

#[derive(Args, Debug)]
pub struct LockArgs {
    #[command(subcommand)]
    pub command: LockCommands,
}

#[derive(Subcommand, Debug)]
pub enum LockCommands {
    /// Show who holds the lock on a repository
    Status {
        /// Repository directory
        repository: PathBuf,
    },
    /// Remove a lock whose holder is gone or that has outlived the staleness ceiling
    Break {
        /// Repository directory
        repository: PathBuf,
    },
}

#[derive(Debug, Serialize)]
pub struct LockStatusOutput {
    pub repository: String,
    pub locked: bool,
    pub holder: Option<LockInfo>,
    pub age_secs: Option<u64>,
    pub stale: Option<bool>,
}

impl CommandOutput for LockStatusOutput {
    fn to_human(&self) -> String {
        let Some(ref holder) = self.holder else {
            return format!("{} is not locked.", self.repository);
        };

        let age = format_duration(Duration::from_secs(self.age_secs.unwrap_or_default()));
        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL_CONDENSED);
        table.add_row(vec![Cell::new("Repository"), Cell::new(&self.repository)]);
        table.add_row(vec![Cell::new("Operation"), Cell::new(holder.operation)]);
        table.add_row(vec![
            Cell::new("Holder"),
            Cell::new(format!("pid {} on {} ({})", holder.pid, holder.hostname, holder.username)),
        ]);
        table.add_row(vec![Cell::new("Acquired"), Cell::new(format_local(holder.acquired_at))]);
        table.add_row(vec![Cell::new("Age"), Cell::new(age)]);
        table.add_row(vec![Cell::new("Stale"), flag_cell(self.stale.unwrap_or_default())]);
        table.to_string()
    }
}

#[derive(Debug, Serialize)]
pub struct LockBreakOutput {
    pub repository: String,
    pub removed: Option<LockInfo>,
}

impl CommandOutput for LockBreakOutput {
    fn to_human(&self) -> String {
        match self.removed {
            Some(ref info) => format!(
                "Broke stale {} lock on {} (pid {} on {}).",
                info.operation, self.repository, info.pid, info.hostname
            ),
            None => format!("{} was not locked.", self.repository),
        }
    }
}

pub async fn execute(args: LockArgs, context: &AppContext, json_mode: bool) -> Result<()> {
    let lock = context.repository_lock();

    match args.command {
        LockCommands::Status { repository } => {
            let repository = resolve_repository(&repository)?;
            let holder = lock
                .check_lock_status(&repository)
                .await
                .context("Failed to read lock status")?;

            let now = context.clock.now();
            let out = LockStatusOutput {
                repository: repository.display().to_string(),
                locked: holder.is_some(),
                age_secs: holder
                    .as_ref()
                    .map(|info| info.age(now).to_std().unwrap_or_default().as_secs()),
                stale: holder.as_ref().map(|info| lock.is_stale(info)),
                holder,
            };
            output(&out, json_mode);
        }
        LockCommands::Break { repository } => {
            let repository = resolve_repository(&repository)?;
            let removed = lock
                .break_stale_lock(&repository)
                .await
                .with_context(|| format!("Failed to break lock on {}", repository.display()))?;

            let out = LockBreakOutput {
                repository: repository.display().to_string(),
                removed,
            };
            output(&out, json_mode);
        }
    }

    Ok(())
}
