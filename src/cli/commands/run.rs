//! Scheduler daemon.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::history::RunResultOutput;
use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::services::SystemResourceProbe;

/// How often the background sampler refreshes the resource snapshot.
const RESOURCE_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// How often shutdown checks for runs still in flight.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Seconds between schedule checks (overrides orchestrator.tick_interval_secs)
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Check schedules once, run whatever is due and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Serialize)]
pub struct TickOutput {
    pub runs: Vec<RunResultOutput>,
}

impl CommandOutput for TickOutput {
    fn to_human(&self) -> String {
        if self.runs.is_empty() {
            return "No maintenance due.".to_string();
        }
        self.runs
            .iter()
            .map(CommandOutput::to_human)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Serialize)]
pub struct StoppedOutput {
    pub success: bool,
    pub message: String,
}

impl CommandOutput for StoppedOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }
}

pub async fn execute(args: RunArgs, context: &AppContext, json_mode: bool) -> Result<()> {
    let probe = Arc::new(SystemResourceProbe::new());
    let sampler = probe.start(RESOURCE_SAMPLE_INTERVAL);
    let orchestrator = context.orchestrator(probe.clone()).await?;

    if args.once {
        let results = orchestrator.tick().await;
        probe.shutdown();
        let _ = sampler.await;
        output(
            &TickOutput {
                runs: results.iter().map(RunResultOutput::from).collect(),
            },
            json_mode,
        );
        return Ok(());
    }

    let interval = args
        .interval
        .map_or_else(|| context.tick_interval(), Duration::from_secs)
        .max(Duration::from_secs(1));
    let ticker = orchestrator.start(interval);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    orchestrator.stop();
    ticker.abort();

    // Let in-flight runs finish; a second Ctrl-C abandons them.
    let mut forced = false;
    loop {
        let running = orchestrator.running_repositories().await;
        if running.is_empty() {
            break;
        }
        info!(in_flight = running.len(), "Waiting for maintenance runs to finish");
        tokio::select! {
            () = tokio::time::sleep(DRAIN_POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => {
                warn!(in_flight = running.len(), "Abandoning in-flight maintenance runs");
                forced = true;
                break;
            }
        }
    }

    probe.shutdown();
    let _ = sampler.await;

    output(
        &StoppedOutput {
            success: !forced,
            message: if forced {
                "Scheduler stopped; in-flight runs were abandoned.".to_string()
            } else {
                "Scheduler stopped.".to_string()
            },
        },
        json_mode,
    );
    Ok(())
}
