//! Stagewatch daemon
//!
//! Run with: cargo run -- run
//!
//! Commands:
//! - run: poll until SIGINT/SIGTERM (default)
//! - check: fetch one snapshot and print the exception table, no alerts
//! - install: write a systemd unit (stdout unless --output is given)
//!
//! Configuration comes from `STAGEWATCH_*` environment variables (see
//! `stagewatch::config`). RUST_LOG sets the log level (default: info).

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use stagewatch::alerts::{render_table, ExceptionChecker, Notifier, StateTracker};
use stagewatch::config::MonitorConfig;
use stagewatch::service::{self, UnitOptions};
use stagewatch::source::SqlSnapshotSource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "stagewatch", version, about = service::SERVICE_DESCRIPTION)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the database and send alerts until stopped
    Run,
    /// Fetch one snapshot and print the groups in exception
    Check {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Write a systemd unit for this executable
    Install {
        /// Unit file to create; printed to stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
        /// EnvironmentFile holding the STAGEWATCH_* settings
        #[arg(long, env = "STAGEWATCH_ENV_FILE")]
        env_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Install { output, env_file } => {
            init_tracing(None)?;
            install(output.as_deref(), env_file)
        }
        Command::Check { json } => {
            let config = load_config()?;
            check(config, json).await
        }
        Command::Run => {
            let config = load_config()?;
            run(config).await
        }
    }
}

fn load_config() -> Result<MonitorConfig, Box<dyn std::error::Error>> {
    match MonitorConfig::from_env() {
        Ok(config) => {
            init_tracing(config.log_file.as_deref())?;
            Ok(config)
        }
        Err(e) => {
            init_tracing(None)?;
            tracing::error!(error = %e, "Invalid configuration");
            Err(e.into())
        }
    }
}

fn init_tracing(log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stagewatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(())
}

async fn run(config: MonitorConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Stagewatch configuration:");
    tracing::info!(
        "  Database: {}@{}:{}",
        config.source.database,
        config.source.host,
        config.source.port
    );
    tracing::info!("  Poll interval: {} seconds", config.poll_interval.as_secs());
    tracing::info!("  Exception marker: {:?}", config.exception_marker);
    match &config.email {
        Some(email) => tracing::info!(
            "  Mail relay: {}:{} -> {}",
            email.relay_host,
            email.port,
            email.recipients.join(", ")
        ),
        None => tracing::info!("  Mail relay: DISABLED (alerts logged only)"),
    }
    if let Some(url) = &config.webhook_url {
        tracing::info!("  Webhook: {}", url);
    }

    let notifier = Notifier::new(config.notify_targets())?;
    let delivery_bound = notifier.delivery_bound();
    let checker = ExceptionChecker::new(
        SqlSnapshotSource::new(&config.source),
        notifier,
        StateTracker::new(config.exception_marker.clone()),
        config.poll_interval,
    )
    .with_delivery_timeout(delivery_bound)
    .with_subject(config.subject.clone());

    tracing::warn!("** Service start **");
    let handle = checker.start();

    service::shutdown_signal().await?;

    let tracked = handle.stop().await?;
    tracing::warn!(tracked = tracked.len(), "*** Service stop ***");
    Ok(())
}

async fn check(config: MonitorConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut checker = ExceptionChecker::new(
        SqlSnapshotSource::new(&config.source),
        Notifier::log_only(),
        StateTracker::new(config.exception_marker.clone()),
        config.poll_interval,
    );

    let changes = checker.observe().await?;
    tracing::debug!(changes = changes.len(), "Snapshot diffed");

    if json {
        println!("{}", serde_json::to_string_pretty(checker.tracked())?);
    } else if checker.tracked().is_empty() {
        println!("No groups in exception");
    } else {
        println!("{}", render_table(checker.tracked()));
    }
    Ok(())
}

fn install(output: Option<&Path>, env_file: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let mut options = UnitOptions::current_exe()?;
    if let Some(env_file) = env_file {
        options = options.with_env_file(env_file);
    }

    match output {
        Some(path) => {
            service::install_unit(&options, path)?;
            println!(
                "Installed {}. Start with: systemctl enable --now {}",
                path.display(),
                service::SERVICE_NAME
            );
        }
        None => print!("{}", service::render_unit(&options)),
    }
    Ok(())
}
