//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::{
    history::HistoryArgs, lock::LockArgs, plan::PlanArgs, run::RunArgs, schedule::ScheduleArgs,
    trigger::TriggerArgs,
};

#[derive(Parser, Debug)]
#[command(name = "steward")]
#[command(about = "Steward - backup repository maintenance orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Load configuration from this file instead of .steward/config.yaml
    #[arg(long, global = true, env = "STEWARD_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the maintenance scheduler until interrupted
    Run(RunArgs),

    /// Run maintenance on one repository now
    Trigger(TriggerArgs),

    /// Manage maintenance schedules
    Schedule(ScheduleArgs),

    /// Show how tasks would be grouped and whether each group can start
    Plan(PlanArgs),

    /// Inspect or break repository locks
    Lock(LockArgs),

    /// Show past maintenance runs
    History(HistoryArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::lock::LockCommands;
    use crate::cli::commands::schedule::ScheduleCommands;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_schedule_set() {
        let cli = Cli::try_parse_from([
            "steward", "schedule", "set", "/srv/repo", "--days", "mon,thu", "--at", "02:30",
        ])
        .unwrap();

        let Commands::Schedule(args) = cli.command else {
            panic!("expected schedule command");
        };
        let ScheduleCommands::Set { days, at, .. } = args.command else {
            panic!("expected set subcommand");
        };
        assert_eq!(days, vec!["mon".to_string(), "thu".to_string()]);
        assert_eq!(at, "02:30");
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["steward", "lock", "status", "/srv/repo", "--json", "--config", "/etc/steward.yaml"])
            .unwrap();

        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/steward.yaml")));
        assert!(matches!(
            cli.command,
            Commands::Lock(LockArgs { command: LockCommands::Status { .. } })
        ));
    }

    #[test]
    fn test_unknown_subcommand_rejected() {
        assert!(Cli::try_parse_from(["steward", "frobnicate"]).is_err());
    }
}
