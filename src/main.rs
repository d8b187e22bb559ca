use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use inquire::Confirm;
use std::path::PathBuf;

use dirsync::filesystem::LocalFs;
use dirsync::logger::{self, FileLog};
use dirsync::onboarding;
use dirsync::scheduler::{Scheduler, StopSignal, DEFAULT_COUNTDOWN_SECONDS};
use dirsync::settings::{self, StoredConfig};
use dirsync::sync::SyncEngine;

#[derive(Parser)]
#[command(name = "dirsync")]
#[command(about = "Periodically mirror a source directory into a replica", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory to mirror
    #[arg(long)]
    source: Option<PathBuf>,

    /// Directory kept identical to the source
    #[arg(long)]
    replica: Option<PathBuf>,

    /// Directory for logs and the archive
    #[arg(long)]
    logs: Option<PathBuf>,

    /// Seconds between the starts of two sync runs
    #[arg(long, allow_negative_numbers = true)]
    interval: Option<i64>,

    /// Move replaced and removed replica entries to the archive
    #[arg(long, value_name = "true|false")]
    archive: Option<bool>,

    /// Treat paths differing only in case as the same
    #[arg(long, value_name = "true|false")]
    case_insensitive: Option<bool>,

    /// Configure interactively instead of from arguments
    #[arg(short, long)]
    interactive: bool,

    /// Start without asking for confirmation
    #[arg(short = 'y', long)]
    yes: bool,

    /// Run a single sync session and exit
    #[arg(long)]
    once: bool,

    /// Show the stored configuration and exit
    #[arg(long)]
    show: bool,
}

impl Cli {
    fn overrides(&self) -> StoredConfig {
        StoredConfig {
            source_directory_path: self.source.clone(),
            replica_directory_path: self.replica.clone(),
            logs_directory: self.logs.clone(),
            sync_interval_seconds: self.interval,
            archive_enabled: self.archive,
            case_insensitive_paths: self.case_insensitive,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init_logger();

    let stored = StoredConfig::load()?;

    if cli.show {
        settings::show_config(&stored);
        return Ok(());
    }

    let config = if cli.interactive {
        let (stored, config) = onboarding::configure_interactive(&stored)?;
        stored.save()?;
        config
    } else {
        let mut merged = stored;
        merged.merge(&cli.overrides());

        let config = match merged.validate() {
            Ok(config) => config,
            Err(errors) => {
                eprintln!("{}", errors.to_string().red());
                eprintln!("{}", "Failed to create config. Exiting the application.".red().bold());
                std::process::exit(1);
            }
        };

        settings::show_config(&merged);
        if !cli.yes && atty::is(atty::Stream::Stdin) {
            let proceed = Confirm::new("Do you want to proceed with this config?")
                .with_default(true)
                .prompt()
                .context("Failed to get confirmation")?;
            if !proceed {
                return Ok(());
            }
        }
        merged.save()?;
        config
    };

    let layout = config.layout();
    layout.ensure()?;
    for path in [layout.general_log_file(), layout.error_log_file()] {
        if let Err(e) = logger::rotate_log_if_needed(&path) {
            log::warn!("Failed to rotate {}: {e:#}", path.display());
        }
    }

    let file_log = FileLog::new(layout)?;
    let mut engine = SyncEngine::new(config.clone(), Box::new(LocalFs::new()), Box::new(file_log));

    let stop = StopSignal::new();
    for signal in signal_hook::consts::TERM_SIGNALS {
        signal_hook::flag::register(*signal, stop.flag())
            .context("Failed to register signal handler")?;
    }

    let mut scheduler = Scheduler::new(config.interval, stop);
    scheduler = if cli.once {
        scheduler.with_countdown(0).with_max_runs(1)
    } else {
        scheduler.with_countdown(DEFAULT_COUNTDOWN_SECONDS)
    };

    let summary = scheduler.start(&mut engine);
    log::info!(
        "Stopped after {} run(s): {} with errors, {} aborted, {} overrun(s)",
        summary.runs,
        summary.failed_runs,
        summary.aborted_runs,
        summary.overruns
    );

    Ok(())
}
