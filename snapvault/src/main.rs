//! Snapvault - Main entry point
//!
//! Incremental hardlink snapshots over rsync with calendar-based retention.

use anyhow::{anyhow, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use snapvault::{
    config::{self, Config},
    daemon::shutdown::ShutdownCoordinator,
    executor::{BackupExecutor, BackupJob, BackupStatus},
    retention::{IntervalRule, RetentionPolicy},
    storage::{Location, Shell, ShellStorage},
    sync::{RsyncDriver, RsyncOptions},
    utils,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new snapshot of the source
    Backup {
        /// Tree to back up (`/path` or `host:/path`)
        #[arg(long)]
        source: Option<Location>,

        /// Storage location receiving the snapshot
        #[arg(long)]
        destination: Option<Location>,

        /// Hardlink mirror of the source used for move detection
        #[arg(long)]
        mv_record: Option<Location>,

        /// Only report whether anything would change
        #[arg(long)]
        dry_run: bool,

        /// Skip the backup when nothing changed since the latest snapshot
        #[arg(long)]
        only_if_changed: bool,

        /// Do not apply the retention policy afterwards
        #[arg(long)]
        no_clean: bool,

        #[command(flatten)]
        retention: RetentionArgs,
    },

    /// Delete snapshots not kept by the retention policy
    Clean {
        /// Storage location (defaults to the backup destination)
        location: Option<Location>,

        /// Show the decision without deleting anything
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        retention: RetentionArgs,
    },

    /// Copy snapshots missing from a second storage location
    Mirror {
        /// Storage location to replicate
        source: Option<Location>,

        /// Storage location receiving the copies
        mirror: Option<Location>,

        /// Show the plan without copying anything
        #[arg(long)]
        dry_run: bool,
    },

    /// List the snapshots of a storage location, newest first
    List {
        /// Storage location (defaults to the backup destination)
        location: Option<Location>,

        /// Print the catalog as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct RetentionArgs {
    /// Retention rule such as `day=7`; replaces the configured rules
    #[arg(long = "keep", value_name = "RULE")]
    keep: Vec<IntervalRule>,

    /// Allow the newest snapshot to be deleted
    #[arg(long)]
    no_protect_latest: bool,
}

impl RetentionArgs {
    /// Policy from the command line, falling back to the config file.
    fn policy(&self, config: &Config) -> Result<Option<RetentionPolicy>> {
        let protect_latest = config.retention.protect_latest && !self.no_protect_latest;
        let rules = if self.keep.is_empty() {
            match config.retention.policy()? {
                Some(policy) => policy.rules().to_vec(),
                None => return Ok(None),
            }
        } else {
            self.keep.clone()
        };
        Ok(Some(RetentionPolicy::new(rules, protect_latest)?))
    }
}

fn location_or(arg: Option<Location>, configured: Option<&str>, what: &str) -> Result<Location> {
    match arg {
        Some(location) => Ok(location),
        None => config::parse_location(configured)?
            .ok_or_else(|| anyhow!("no {what} given on the command line or in the config file")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!("Starting snapvault v{}", env!("CARGO_PKG_VERSION"));

    // Signals cancel running rsync/ssh children
    let shutdown_coordinator = ShutdownCoordinator::new();
    let signal_watch = shutdown_coordinator.clone();
    tokio::spawn(async move {
        signal_watch.wait_for_signal().await;
    });

    let shell = Shell::new(config.ssh.key.clone()).with_cancel(shutdown_coordinator.token());
    let storage = ShellStorage::new(shell.clone());
    let options = RsyncOptions {
        program: config.sync.program.clone(),
        extra_args: config.sync.extra_args.clone(),
        verbose: config.sync.verbose,
    };
    let driver = RsyncDriver::new(storage.clone(), shell, options);
    let executor = BackupExecutor::new(driver, storage);

    let result = run(&executor, &config, args.command).await;

    // Stop the signal watcher
    shutdown_coordinator.trigger();
    result
}

async fn run(
    executor: &BackupExecutor<RsyncDriver<ShellStorage>, ShellStorage>,
    config: &Config,
    command: Command,
) -> Result<()> {
    let backup = &config.backup;

    match command {
        Command::Backup {
            source,
            destination,
            mv_record,
            dry_run,
            only_if_changed,
            no_clean,
            retention,
        } => {
            let mut job = BackupJob::new(
                location_or(source, backup.source.as_deref(), "backup source")?,
                location_or(destination, backup.destination.as_deref(), "backup destination")?,
            );
            job.mv_record = match mv_record {
                Some(location) => Some(location),
                None => config::parse_location(backup.mv_record.as_deref())?,
            };
            job.dry_run = dry_run;
            job.only_if_changed = only_if_changed || backup.only_if_changed;
            if backup.clean_after && !no_clean {
                job.retention = retention.policy(config)?;
            }

            let report = executor.backup(&job).await?;
            match report.status {
                BackupStatus::Created => {
                    if let Some(snapshot) = &report.snapshot {
                        println!("{snapshot}");
                    }
                }
                BackupStatus::Unchanged => println!("unchanged, no snapshot created"),
                BackupStatus::DryRun(outcome) => println!("dry run: {outcome:?}"),
            }
        }

        Command::Clean {
            location,
            dry_run,
            retention,
        } => {
            let location = location_or(location, backup.destination.as_deref(), "location to clean")?;
            let policy = retention
                .policy(config)?
                .ok_or_else(|| anyhow!("no retention rules configured, refusing to clean"))?;

            let decision = executor.clean(&location, &policy, dry_run).await?;
            print!("{}", decision.report());
        }

        Command::Mirror {
            source,
            mirror,
            dry_run,
        } => {
            let source = location_or(source, config.mirror.source.as_deref(), "mirror source")?;
            let mirror = location_or(mirror, config.mirror.target.as_deref(), "mirror target")?;

            let plan = executor.mirror(&source, &mirror, dry_run).await?;
            for step in &plan {
                println!("{}", mirror.with_path(&step.destination));
            }
        }

        Command::List { location, json } => {
            let location = location_or(location, backup.destination.as_deref(), "location to list")?;
            let catalog = executor.list(&location).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(catalog.snapshots())?);
            } else {
                for snapshot in catalog.iter() {
                    println!("{}", snapshot.name());
                }
            }
        }
    }

    Ok(())
}
