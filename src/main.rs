//! Steward CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;

use steward::cli::{commands, AppContext, Cli, Commands};
use steward::infrastructure::config::ConfigLoader;
use steward::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_mode = cli.json;

    if let Err(err) = run(cli).await {
        steward::cli::handle_error(err, json_mode);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match cli.config {
        Some(ref path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };

    let _logger = LoggerImpl::init(&LogConfig::from(&config.logging)).context("Failed to initialize logging")?;
    let context = AppContext::open(config).await?;

    match cli.command {
        Commands::Run(args) => commands::run::execute(args, &context, cli.json).await,
        Commands::Trigger(args) => commands::trigger::execute(args, &context, cli.json).await,
        Commands::Schedule(args) => commands::schedule::execute(args, &context, cli.json).await,
        Commands::Plan(args) => commands::plan::execute(args, &context, cli.json).await,
        Commands::Lock(args) => commands::lock::execute(args, &context, cli.json).await,
        Commands::History(args) => commands::history::execute(args, &context, cli.json).await,
    }
}
