mod cache;
mod cli;
mod config;
mod downloads;
mod event;
mod logging;
mod search;
mod state;
mod store;

use clap::Parser;
use color_eyre::Result;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = cli::Cli::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Held until exit so buffered log lines are flushed
  let _log_guard = logging::init(&config::Config::data_dir()?.join("logs"), args.verbose)?;
  tracing::debug!(origin = %config.origin, "Configuration loaded");

  cli::run(args, config).await
}
