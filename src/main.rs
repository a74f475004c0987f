// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use reviewd::{
    config::ReviewdConfig,
    generator::{claude::ClaudeCli, ReviewGenerator},
    orchestrator::ReviewPipeline,
    sched,
    source::{gerrit::GerritSource, ChangeSource},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "reviewd",
    about = "Gerrit AI reviewer — unattended polling daemon",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Data directory for config.toml and the tracking store
    #[arg(long, env = "REVIEWD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "REVIEWD_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "REVIEWD_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: one immediate poll, then the recurring schedule
    /// (default when no subcommand given).
    Run,
    /// Run exactly one poll cycle and exit. Useful from cron or for testing
    /// a configuration.
    Once,
    /// Probe gerrit and the claude CLI, then exit.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Arc::new(ReviewdConfig::new(args.data_dir, args.log));

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("failed to create data directory {}", config.data_dir.display())
    })?;

    let _log_guard = init_logging(&config, args.log_file.as_deref());
    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        gerrit = %format!("{}@{}:{}", config.gerrit.username, config.gerrit.host, config.gerrit.port),
        "reviewd starting"
    );

    let source: Arc<dyn ChangeSource> = Arc::new(
        GerritSource::new(config.gerrit.clone()).context("gerrit source configuration invalid")?,
    );
    let generator: Arc<dyn ReviewGenerator> = Arc::new(ClaudeCli::new(config.review.clone()));

    // Startup connectivity check — unreachable collaborators are fatal
    // before the schedule loop ever starts.
    source
        .check_connectivity()
        .await
        .context("startup check failed: gerrit unreachable")?;
    generator
        .check_connectivity()
        .await
        .context("startup check failed: claude CLI unreachable")?;

    match args.command.unwrap_or(Command::Run) {
        Command::Check => {
            info!("connectivity checks passed");
            println!("ok");
        }
        Command::Once => {
            let pipeline = ReviewPipeline::new(Arc::clone(&config), source, generator);
            pipeline.run_cycle().await;
        }
        Command::Run => {
            let pipeline = Arc::new(ReviewPipeline::new(Arc::clone(&config), source, generator));
            sched::run_loop(pipeline, &config.schedule).await;
        }
    }

    Ok(())
}

/// Initialise the tracing subscriber.
///
/// Returns the non-blocking writer guard when logging to a file — dropping
/// it flushes and stops the background writer, so `main` holds it for the
/// process lifetime.
fn init_logging(
    config: &ReviewdConfig,
    log_file: Option<&std::path::Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = || EnvFilter::new(config.log.clone());

    match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "reviewd.log".to_string());
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name));

            if config.log_format == "json" {
                tracing_subscriber::registry()
                    .with(filter())
                    .with(fmt::layer().json().with_writer(writer))
                    .with(fmt::layer().compact())
                    .init();
            } else {
                tracing_subscriber::registry()
                    .with(filter())
                    .with(fmt::layer().with_ansi(false).with_writer(writer))
                    .with(fmt::layer().compact())
                    .init();
            }
            Some(guard)
        }
        None => {
            if config.log_format == "json" {
                tracing_subscriber::fmt().json().with_env_filter(filter()).init();
            } else {
                tracing_subscriber::fmt()
                    .with_env_filter(filter())
                    .compact()
                    .init();
            }
            None
        }
    }
}
