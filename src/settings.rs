use anyhow::{Context, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{ConfigManager, LogLayout};
use crate::paths::PathPolicy;

/// Interval used when nothing else is configured (2.5 hours).
pub const DEFAULT_INTERVAL_SECONDS: i64 = 9000;

/// Configuration as persisted in `config.json` and as collected from the
/// command line. Every field is optional until [`StoredConfig::validate`]
/// turns it into a [`SyncConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StoredConfig {
    pub source_directory_path: Option<PathBuf>,
    pub replica_directory_path: Option<PathBuf>,
    pub logs_directory: Option<PathBuf>,
    pub sync_interval_seconds: Option<i64>,
    pub archive_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_insensitive_paths: Option<bool>,
}

/// Fully validated, immutable configuration the sync engine runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub source: PathBuf,
    pub replica: PathBuf,
    pub logs: PathBuf,
    pub interval: Duration,
    pub archive_enabled: bool,
    pub path_policy: PathPolicy,
}

impl SyncConfig {
    pub fn layout(&self) -> LogLayout {
        LogLayout::new(&self.logs)
    }

    /// Directory holding one archive directory per sync session.
    pub fn archive_root(&self) -> PathBuf {
        self.layout().archive_dir()
    }
}

/// Every rule a configuration violates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigErrors(pub Vec<String>);

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Invalid configuration:")?;
        for (i, problem) in self.0.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, problem)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

impl StoredConfig {
    /// Configuration used when no config file exists.
    pub fn defaults() -> Self {
        StoredConfig {
            sync_interval_seconds: Some(DEFAULT_INTERVAL_SECONDS),
            archive_enabled: Some(true),
            ..Default::default()
        }
    }

    /// Load the configuration from the config directory.
    pub fn load() -> Result<Self> {
        Ok(Self::load_from(&ConfigManager::config_file_path()?))
    }

    /// Load the configuration stored at `path`.
    ///
    /// A missing file gives [`StoredConfig::defaults`]. So does a file that
    /// cannot be read, parsed, or validated; the problem is reported first.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::defaults();
        }

        let parsed = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))
            .and_then(|content| {
                serde_json::from_str::<StoredConfig>(&content)
                    .context("Failed to parse config file")
            });

        match parsed {
            Ok(config) => match config.validate() {
                Ok(_) => config,
                Err(errors) => {
                    log::warn!("Stored configuration is no longer valid, using defaults.\n{errors}");
                    Self::defaults()
                }
            },
            Err(e) => {
                log::warn!("{e:#}; using defaults");
                Self::defaults()
            }
        }
    }

    /// Save the configuration to the config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&ConfigManager::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Overwrite every field that `overrides` sets.
    pub fn merge(&mut self, overrides: &StoredConfig) {
        if let Some(path) = non_empty(&overrides.source_directory_path) {
            self.source_directory_path = Some(path.to_path_buf());
        }
        if let Some(path) = non_empty(&overrides.replica_directory_path) {
            self.replica_directory_path = Some(path.to_path_buf());
        }
        if let Some(path) = non_empty(&overrides.logs_directory) {
            self.logs_directory = Some(path.to_path_buf());
        }
        if let Some(interval) = overrides.sync_interval_seconds {
            self.sync_interval_seconds = Some(interval);
        }
        if let Some(archive) = overrides.archive_enabled {
            self.archive_enabled = Some(archive);
        }
        if let Some(insensitive) = overrides.case_insensitive_paths {
            self.case_insensitive_paths = Some(insensitive);
        }
    }

    pub fn path_policy(&self) -> PathPolicy {
        PathPolicy::from_case_insensitive(self.case_insensitive_paths.unwrap_or(false))
    }

    /// Check every rule and either build a [`SyncConfig`] or report all
    /// violations at once.
    pub fn validate(&self) -> std::result::Result<SyncConfig, ConfigErrors> {
        let mut problems = Vec::new();

        let source = check_dir(&self.source_directory_path, "Source", &mut problems);
        let replica = check_dir(&self.replica_directory_path, "Replica", &mut problems);
        let logs = check_dir(&self.logs_directory, "Logs", &mut problems);

        let interval = match self.sync_interval_seconds {
            Some(seconds) if seconds > 0 => Some(Duration::from_secs(seconds as u64)),
            Some(seconds) => {
                problems.push(format!(
                    "Sync interval must be a positive number of seconds, got {seconds}."
                ));
                None
            }
            None => {
                problems.push("Sync interval is not provided.".to_string());
                None
            }
        };

        if self.archive_enabled.is_none() {
            problems.push("Archiving flag is not provided.".to_string());
        }

        let policy = self.path_policy();

        match (source, replica, logs, interval, self.archive_enabled) {
            (Some(source), Some(replica), Some(logs), Some(interval), Some(archive_enabled))
                if problems.is_empty() =>
            {
                check_overlap(&source, &replica, &logs, policy, &mut problems);
                if !problems.is_empty() {
                    return Err(ConfigErrors(problems));
                }
                Ok(SyncConfig {
                    source,
                    replica,
                    logs,
                    interval,
                    archive_enabled,
                    path_policy: policy,
                })
            }
            _ => Err(ConfigErrors(problems)),
        }
    }
}

fn non_empty(path: &Option<PathBuf>) -> Option<&Path> {
    path.as_deref().filter(|p| !p.as_os_str().is_empty())
}

fn check_dir(path: &Option<PathBuf>, label: &str, problems: &mut Vec<String>) -> Option<PathBuf> {
    match non_empty(path) {
        None => {
            problems.push(format!("{label} directory path is not provided."));
            None
        }
        Some(path) if !path.is_dir() => {
            problems.push(format!(
                "{label} directory does not exist: {}",
                path.display()
            ));
            None
        }
        // Overlap checks compare the resolved locations.
        Some(path) => match fs::canonicalize(path) {
            Ok(resolved) => Some(resolved),
            Err(e) => {
                problems.push(format!(
                    "{label} directory cannot be resolved: {} ({e})",
                    path.display()
                ));
                None
            }
        },
    }
}

fn check_overlap(
    source: &Path,
    replica: &Path,
    logs: &Path,
    policy: PathPolicy,
    problems: &mut Vec<String>,
) {
    let named = [("Source", source), ("Replica", replica), ("Logs", logs)];

    for (i, (outer_label, outer)) in named.iter().enumerate() {
        for (inner_label, inner) in named.iter().skip(i + 1) {
            if policy.same_path(outer, inner) {
                problems.push(format!(
                    "{outer_label} and {} directories cannot be the same.",
                    inner_label.to_lowercase()
                ));
            } else if policy.is_within(outer, inner) {
                problems.push(format!(
                    "{inner_label} directory cannot be inside the {} directory.",
                    outer_label.to_lowercase()
                ));
            } else if policy.is_within(inner, outer) {
                problems.push(format!(
                    "{outer_label} directory cannot be inside the {} directory.",
                    inner_label.to_lowercase()
                ));
            }
        }
    }
}

fn display_path(path: &Option<PathBuf>) -> String {
    non_empty(path)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "Not set".to_string())
}

/// Print a configuration in a readable form.
pub fn show_config(config: &StoredConfig) {
    println!("{}", "Current Configuration:".bold());
    println!(
        "  {}: {}",
        "Source directory".cyan(),
        display_path(&config.source_directory_path)
    );
    println!(
        "  {}: {}",
        "Replica directory".cyan(),
        display_path(&config.replica_directory_path)
    );
    println!(
        "  {}: {}",
        "Logs directory".cyan(),
        display_path(&config.logs_directory)
    );
    println!(
        "  {}: {}",
        "Sync interval".cyan(),
        config
            .sync_interval_seconds
            .map(|s| format!("{s} seconds"))
            .unwrap_or_else(|| "Not set".to_string())
    );
    println!(
        "  {}: {}",
        "Archiving".cyan(),
        match config.archive_enabled {
            Some(true) => "Enabled".green(),
            Some(false) => "Disabled".yellow(),
            None => "Not set".red(),
        }
    );
    println!(
        "  {}: {}",
        "Path comparison".cyan(),
        if config.path_policy().is_case_insensitive() {
            "Case-insensitive"
        } else {
            "Case-sensitive"
        }
    );
}
