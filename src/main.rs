mod api;
mod app;
mod cache;
mod commands;
mod config;
mod logging;
mod task;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fintrack")]
#[command(about = "FinTrack from the terminal, usable offline")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fintrack/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let _log_guard = logging::init(&config::Config::data_dir()?)?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let app = app::App::new(config).await?;
  let result = app.run(args.command).await;

  // Let photo downloads started during the command finish
  app.client().drain_tasks().await;

  println!("{}", result?);
  Ok(())
}
