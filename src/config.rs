use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "dirsync";

/// Cross-platform configuration directory manager
pub struct ConfigManager;

impl ConfigManager {
    /// Get the main configuration directory path following platform conventions:
    /// - Linux: $XDG_CONFIG_HOME/dirsync or ~/.config/dirsync
    /// - macOS: ~/Library/Application Support/dirsync
    /// - Windows: %APPDATA%\dirsync
    pub fn config_dir() -> Result<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            // Follow XDG Base Directory Specification
            if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
                Ok(PathBuf::from(xdg_config).join(APP_DIR_NAME))
            } else {
                let home = dirs::home_dir().context("Failed to get home directory")?;
                Ok(home.join(".config").join(APP_DIR_NAME))
            }
        }

        #[cfg(target_os = "macos")]
        {
            let home = dirs::home_dir().context("Failed to get home directory")?;
            Ok(home
                .join("Library")
                .join("Application Support")
                .join(APP_DIR_NAME))
        }

        #[cfg(target_os = "windows")]
        {
            Ok(dirs::config_dir()
                .context("Failed to get Windows config directory")?
                .join(APP_DIR_NAME))
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            let home = dirs::home_dir().context("Failed to get home directory")?;
            Ok(home.join(".dirsync"))
        }
    }

    /// Get the persisted configuration file path (config.json)
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }
}

/// Directory layout derived from the configured logs directory:
///
/// ```text
/// <logs>/DirSync/Logs/Log.txt
/// <logs>/DirSync/Logs/<session-id>.txt
/// <logs>/DirSync/Error Logs/Error_Log.txt
/// <logs>/DirSync/Archive/<session-id>/
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLayout {
    root: PathBuf,
}

impl LogLayout {
    pub fn new(logs_dir: &Path) -> Self {
        LogLayout {
            root: logs_dir.join("DirSync"),
        }
    }

    pub fn general_dir(&self) -> PathBuf {
        self.root.join("Logs")
    }

    pub fn error_dir(&self) -> PathBuf {
        self.root.join("Error Logs")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("Archive")
    }

    pub fn general_log_file(&self) -> PathBuf {
        self.general_dir().join("Log.txt")
    }

    pub fn error_log_file(&self) -> PathBuf {
        self.error_dir().join("Error_Log.txt")
    }

    pub fn session_log_file(&self, session_id: &str) -> PathBuf {
        self.general_dir().join(format!("{session_id}.txt"))
    }

    /// Create every directory of the layout.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.general_dir(),
            self.error_dir(),
            self.archive_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}
