mod app;
mod auth;
mod cache;
mod clock;
mod commands;
mod config;
mod github;
mod notify;
mod settings;
mod sync;

use clap::{ArgAction, Parser};
use color_eyre::Result;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "gfit")]
#[command(about = "Track good first issues across GitHub repositories")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/gfit/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Increase log verbosity (-v info, -vv debug, -vvv trace)
  #[arg(short, long, action = ArgAction::Count, global = true)]
  verbose: u8,

  /// Keep fetched issues in memory only for this run
  #[arg(long, global = true)]
  no_cache: bool,

  #[command(subcommand)]
  command: commands::Command,
}

/// Log to a daily file in the data directory so stdout stays clean.
/// `RUST_LOG` overrides the verbosity flag.
fn init_tracing(log_dir: &Path, verbosity: u8) -> WorkerGuard {
  let level = match verbosity {
    0 => tracing::Level::WARN,
    1 => tracing::Level::INFO,
    2 => tracing::Level::DEBUG,
    _ => tracing::Level::TRACE,
  };
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

  let appender = tracing_appender::rolling::daily(log_dir, "gfit.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(filter)
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .init();

  guard
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;
  std::fs::create_dir_all(&data_dir)?;
  let _log_guard = init_tracing(&data_dir.join("logs"), args.verbose);

  let app = app::App::new(config, args.no_cache).await?;
  commands::run(&app, args.command).await?;

  Ok(())
}
