use clap::Parser;
use std::path::PathBuf;

use steward::cli::commands::lock::LockCommands;
use steward::cli::commands::schedule::ScheduleCommands;
use steward::cli::{Cli, Commands};

#[test]
fn test_parse_run_defaults() {
    let cli = Cli::try_parse_from(["steward", "run"]).unwrap();

    match cli.command {
        Commands::Run(args) => {
            assert!(!args.once);
            assert!(args.interval.is_none());
        }
        _ => panic!("Wrong top-level command"),
    }
    assert!(!cli.json);
    assert!(cli.config.is_none());
}

#[test]
fn test_parse_run_once_with_interval() {
    let cli = Cli::try_parse_from(["steward", "run", "--once", "--interval", "15"]).unwrap();

    match cli.command {
        Commands::Run(args) => {
            assert!(args.once);
            assert_eq!(args.interval, Some(15));
        }
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_schedule_set_defaults() {
    let cli = Cli::try_parse_from(["steward", "schedule", "set", "/srv/repo", "--days", "daily"]).unwrap();

    match cli.command {
        Commands::Schedule(args) => match args.command {
            ScheduleCommands::Set {
                repository,
                days,
                at,
                max_duration,
                tasks,
                disabled,
            } => {
                assert_eq!(repository, PathBuf::from("/srv/repo"));
                assert_eq!(days, vec!["daily".to_string()]);
                assert_eq!(at, "03:00");
                assert_eq!(max_duration, 120);
                assert!(tasks.is_empty());
                assert!(!disabled);
            }
            _ => panic!("Wrong schedule command"),
        },
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_schedule_set_requires_days() {
    assert!(Cli::try_parse_from(["steward", "schedule", "set", "/srv/repo"]).is_err());
}

#[test]
fn test_parse_schedule_set_tasks_list() {
    let cli = Cli::try_parse_from([
        "steward",
        "schedule",
        "set",
        "/srv/repo",
        "--days",
        "sun",
        "--tasks",
        "health_check,prune",
        "--max-duration",
        "45",
        "--disabled",
    ])
    .unwrap();

    match cli.command {
        Commands::Schedule(args) => match args.command {
            ScheduleCommands::Set {
                tasks,
                max_duration,
                disabled,
                ..
            } => {
                assert_eq!(tasks, vec!["health_check".to_string(), "prune".to_string()]);
                assert_eq!(max_duration, 45);
                assert!(disabled);
            }
            _ => panic!("Wrong schedule command"),
        },
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_plan_without_repository() {
    let cli = Cli::try_parse_from(["steward", "plan", "--tasks", "prune,rebuild_index"]).unwrap();

    match cli.command {
        Commands::Plan(args) => {
            assert!(args.repository.is_none());
            assert_eq!(args.tasks.len(), 2);
        }
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_lock_break() {
    let cli = Cli::try_parse_from(["steward", "--json", "lock", "break", "/srv/repo"]).unwrap();

    assert!(cli.json);
    match cli.command {
        Commands::Lock(args) => match args.command {
            LockCommands::Break { repository } => assert_eq!(repository, PathBuf::from("/srv/repo")),
            LockCommands::Status { .. } => panic!("Wrong lock command"),
        },
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_history_limit() {
    let cli = Cli::try_parse_from(["steward", "history", "/srv/repo", "--limit", "5"]).unwrap();

    match cli.command {
        Commands::History(args) => {
            assert_eq!(args.repository, PathBuf::from("/srv/repo"));
            assert_eq!(args.limit, 5);
        }
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_trigger_requires_repository() {
    assert!(Cli::try_parse_from(["steward", "trigger"]).is_err());
}
