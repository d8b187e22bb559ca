use anyhow::{Context, Result};
use colored::Colorize;
use inquire::validator::Validation;
use inquire::{Confirm, CustomUserError, Text};
use std::path::PathBuf;

use crate::settings::{show_config, StoredConfig, SyncConfig, DEFAULT_INTERVAL_SECONDS};

/// Collect a configuration interactively.
///
/// A valid `current` configuration can be kept as is. Otherwise every field
/// is asked for, and the whole form is repeated until the result validates.
/// The returned [`StoredConfig`] is the one to persist.
pub fn configure_interactive(current: &StoredConfig) -> Result<(StoredConfig, SyncConfig)> {
    if let Ok(config) = current.validate() {
        println!();
        show_config(current);
        println!();

        let keep = Confirm::new("Do you want to continue with the current settings?")
            .with_default(true)
            .prompt()
            .context("Failed to get confirmation")?;
        if keep {
            return Ok((current.clone(), config));
        }
    }

    println!(
        "\n{}",
        "Please provide the data needed for synchronization.".cyan().bold()
    );

    loop {
        let candidate = prompt_for_config(current)?;
        match candidate.validate() {
            Ok(config) => {
                println!("{}", "✓ Configuration complete!".green().bold());
                return Ok((candidate, config));
            }
            Err(errors) => {
                println!("{}", errors.to_string().red());
                println!("{}", "Let's try again.".yellow());
            }
        }
    }
}

fn prompt_for_config(current: &StoredConfig) -> Result<StoredConfig> {
    let source = prompt_for_path("Source directory:", &current.source_directory_path)?;
    let replica = prompt_for_path("Replica directory:", &current.replica_directory_path)?;
    let logs = prompt_for_path("Logs directory:", &current.logs_directory)?;

    let interval_default = current
        .sync_interval_seconds
        .filter(|s| *s > 0)
        .unwrap_or(DEFAULT_INTERVAL_SECONDS)
        .to_string();
    let interval = Text::new("Synchronization interval in seconds:")
        .with_default(&interval_default)
        .with_validator(|input: &str| -> Result<Validation, CustomUserError> {
            Ok(match parse_interval(input) {
                Ok(_) => Validation::Valid,
                Err(message) => Validation::Invalid(message.into()),
            })
        })
        .prompt()
        .context("Failed to get sync interval")?;
    let interval = parse_interval(&interval).map_err(anyhow::Error::msg)?;

    let archive_enabled = Confirm::new("Do you want to use archiving?")
        .with_default(current.archive_enabled.unwrap_or(true))
        .with_help_message("Replaced and removed replica entries are moved to the archive instead of deleted")
        .prompt()
        .context("Failed to get archiving preference")?;

    let case_insensitive = Confirm::new("Compare paths case-insensitively?")
        .with_default(current.case_insensitive_paths.unwrap_or(false))
        .prompt()
        .context("Failed to get path comparison preference")?;

    Ok(StoredConfig {
        source_directory_path: Some(source),
        replica_directory_path: Some(replica),
        logs_directory: Some(logs),
        sync_interval_seconds: Some(interval),
        archive_enabled: Some(archive_enabled),
        case_insensitive_paths: Some(case_insensitive),
    })
}

fn prompt_for_path(message: &str, current: &Option<PathBuf>) -> Result<PathBuf> {
    let current = current.as_ref().map(|p| p.display().to_string());
    let mut prompt = Text::new(message)
        .with_placeholder("~/path/to/directory")
        .with_validator(|input: &str| -> Result<Validation, CustomUserError> {
            Ok(match check_directory_input(input) {
                Ok(_) => Validation::Valid,
                Err(message) => Validation::Invalid(message.into()),
            })
        });

    if let Some(default) = current.as_deref().filter(|p| !p.is_empty()) {
        prompt = prompt.with_default(default);
    }

    let input = prompt
        .prompt()
        .with_context(|| format!("Failed to get {}", message.trim_end_matches(':')))?;
    check_directory_input(&input).map_err(anyhow::Error::msg)
}

/// Parse a positive number of seconds.
fn parse_interval(input: &str) -> std::result::Result<i64, String> {
    match input.trim().parse::<i64>() {
        Ok(seconds) if seconds > 0 => Ok(seconds),
        _ => Err("Please enter a positive whole number of seconds.".to_string()),
    }
}

/// Expand `input` and require it to name an existing directory.
fn check_directory_input(input: &str) -> std::result::Result<PathBuf, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("Please enter a path.".to_string());
    }
    let path = expand_tilde(trimmed).map_err(|e| e.to_string())?;
    if !path.is_dir() {
        return Err("Invalid path or directory does not exist.".to_string());
    }
    Ok(path)
}

/// Expand tilde in path
fn expand_tilde(path: &str) -> Result<PathBuf> {
    if path.starts_with("~/") || path == "~" {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        if path == "~" {
            Ok(home)
        } else {
            Ok(home.join(&path[2..]))
        }
    } else {
        Ok(PathBuf::from(path))
    }
}
