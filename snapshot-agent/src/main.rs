//! Snapshot Agent - Main entry point
//!
//! Takes incremental, hard-link-deduplicated snapshots of the configured
//! include paths.

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use snapshot_agent::daemon::{ProfileLock, ShutdownCoordinator};
use snapshot_agent::state::StateData;
use snapshot_agent::transfer::progress::format_bytes;
use snapshot_agent::{policy, utils, Config, SnapshotId, Snapshots};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take a snapshot if anything changed since the last one
    Backup {
        /// Take a snapshot even if nothing changed
        #[arg(long)]
        force: bool,

        /// Discard the snapshot when any file fails
        #[arg(long)]
        no_continue_on_errors: bool,
    },
    /// List committed snapshots, newest first
    List,
    /// Validate the configuration and show what would be backed up
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?
    } else {
        Config::default()
    };

    if let Command::Backup {
        force,
        no_continue_on_errors,
    } = &args.command
    {
        config.snapshots.regardless_of_changes |= *force;
        if *no_continue_on_errors {
            config.snapshots.continue_on_errors = false;
        }
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level, &config.log.output)?;

    let config = Arc::new(config);
    match args.command {
        Command::Backup { .. } => backup(config).await,
        Command::List => list(&config),
        Command::CheckConfig => check_config(&config),
    }
}

async fn backup(config: Arc<Config>) -> Result<ExitCode> {
    tracing::info!(
        "Starting snapshot-agent v{} (profile {}: {})",
        env!("CARGO_PKG_VERSION"),
        config.profile.id,
        config.profile.name
    );

    let lock = ProfileLock::acquire(&config.daemon.lock_file)?;
    let mut state = StateData::load_or_migrate(&config.daemon.state_file, &config)?;

    let now = Local::now();
    let sid = SnapshotId::new(now, &config);
    let includes = config.snapshots.include.clone();
    let engine = Snapshots::new(Arc::clone(&config));
    let run_sid = sid.clone();
    let run = tokio::task::spawn_blocking(move || engine.take_snapshot(&run_sid, now, &includes));

    // Wait for the run or a shutdown signal
    let coordinator = ShutdownCoordinator::new();
    let mut shutdown_rx = coordinator.subscribe();
    let signals = tokio::spawn(async move { coordinator.wait_for_signal().await });

    let result = tokio::select! {
        joined = run => joined.context("Snapshot task panicked")?,
        Ok(received) = shutdown_rx.recv() => {
            tracing::warn!(
                "Interrupted, the staging area is left resumable for the next run"
            );
            // Runtime shutdown would block on the transfer thread
            drop(lock);
            std::process::exit(received.exit_code());
        }
    };
    signals.abort();
    drop(lock);

    state.record_run(&config.profile.id, &sid, now, result);
    state.save(&config.daemon.state_file)?;

    tracing::info!(
        "Run finished: snapshot created: {}, error occurred: {}",
        result.snapshot_created,
        result.error_occurred
    );
    Ok(if result.error_occurred {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn list(config: &Config) -> Result<ExitCode> {
    for sid in SnapshotId::list(config)? {
        let marker = if sid.has_failed() { " (with errors)" } else { "" };
        match sid.info() {
            Ok(info) => println!(
                "{}{}  {} files, {} copied",
                sid,
                marker,
                info.stats.successes(),
                format_bytes(info.stats.copied_bytes)
            ),
            Err(_) => println!("{}{}", sid, marker),
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn check_config(config: &Config) -> Result<ExitCode> {
    config.validate()?;
    let resolved = policy::resolve(
        &config.snapshots.include,
        &config.snapshots.exclude,
        config.snapshots.continue_on_errors,
        config.snapshots.regardless_of_changes,
    )?;

    println!("Snapshot directory: {}", config.profile_snapshot_dir().display());
    println!("Includes:");
    for entry in &resolved.includes {
        println!("  {:?} {}", entry.kind, entry.path.display());
    }
    println!("Excludes:");
    for pattern in resolved.excludes.patterns() {
        println!("  {}", pattern);
    }
    println!("Continue on errors: {}", resolved.policy.continue_on_errors);
    println!("Regardless of changes: {}", resolved.policy.force);
    println!("Transfer tool: {:?}", config.transfer.tool);
    Ok(ExitCode::SUCCESS)
}
