use anyhow::{Context, Result};
use log::LevelFilter;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::config::LogLayout;

/// Log files larger than this are rotated at startup.
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Initialize console logging
///
/// Console output is controlled via the `RUST_LOG` environment variable:
/// - `RUST_LOG=error` - Only errors
/// - `RUST_LOG=warn` - Warnings and errors
/// - `RUST_LOG=info` - Info, warnings, and errors (default)
/// - `RUST_LOG=debug` - Debug and above
///
/// File logging is independent of this and handled by [`FileLog`].
pub fn init_logger() {
    let default_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{:5}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(default_level)
        .target(env_logger::Target::Stdout)
        .try_init()
        .ok(); // Ignore error if logger is already initialized
}

/// Sinks a sync run writes to.
///
/// General messages and errors go to long-lived logs. Session lines go to a
/// per-run log that is opened when the run starts and may be discarded when
/// the run changed nothing.
pub trait SyncLog {
    fn message(&self, line: &str);

    fn error(&self, line: &str);

    /// Write to the current session log, or the general log when no session
    /// is open.
    fn session(&self, line: &str);

    fn open_session(&mut self, session_id: &str) -> Result<()>;

    /// Whether a session log with this identifier already exists.
    fn has_session(&self, session_id: &str) -> bool;

    /// Delete the current session log and close it.
    fn discard_session(&mut self) -> Result<()>;

    /// Close the current session log, keeping it.
    fn close_session(&mut self);
}

/// Append a timestamped line to `path`, creating the file if needed.
pub fn append_line(path: &Path, message: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;

    writeln!(
        file,
        "[{}] {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        message
    )
    .with_context(|| format!("Failed to write log file: {}", path.display()))?;

    Ok(())
}

/// Rotate a log file if it exceeds the size limit (10MB)
///
/// The current file is renamed to `<name>.old`, replacing any older backup.
pub fn rotate_log_if_needed(log_path: &Path) -> Result<()> {
    if !log_path.exists() {
        return Ok(());
    }

    let metadata = std::fs::metadata(log_path)?;
    if metadata.len() <= MAX_LOG_SIZE {
        return Ok(());
    }

    let mut old_name = log_path.as_os_str().to_os_string();
    old_name.push(".old");
    let old_log_path = PathBuf::from(old_name);

    if old_log_path.exists() {
        std::fs::remove_file(&old_log_path)?;
    }
    std::fs::rename(log_path, &old_log_path)?;

    log::info!("Log file rotated to {}", old_log_path.display());
    Ok(())
}

/// [`SyncLog`] writing to the files of a [`LogLayout`], echoing every line to
/// the console logger.
#[derive(Debug)]
pub struct FileLog {
    layout: LogLayout,
    session_file: Option<PathBuf>,
}

impl FileLog {
    /// Create the general and error log files if they are missing.
    pub fn new(layout: LogLayout) -> Result<Self> {
        for path in [layout.general_log_file(), layout.error_log_file()] {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to create log file: {}", path.display()))?;
        }

        Ok(FileLog {
            layout,
            session_file: None,
        })
    }

    fn write(path: &Path, line: &str) {
        if let Err(e) = append_line(path, line) {
            log::warn!("Failed to log message to file: {e:#}");
        }
    }
}

impl SyncLog for FileLog {
    fn message(&self, line: &str) {
        log::info!("{line}");
        Self::write(&self.layout.general_log_file(), line);
    }

    fn error(&self, line: &str) {
        log::error!("{line}");
        Self::write(&self.layout.error_log_file(), line);
    }

    fn session(&self, line: &str) {
        log::info!("{line}");
        match &self.session_file {
            Some(path) => Self::write(path, line),
            None => Self::write(&self.layout.general_log_file(), line),
        }
    }

    fn open_session(&mut self, session_id: &str) -> Result<()> {
        let path = self.layout.session_log_file(session_id);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to create session log: {}", path.display()))?;
        self.session_file = Some(path);
        Ok(())
    }

    fn has_session(&self, session_id: &str) -> bool {
        self.layout.session_log_file(session_id).exists()
    }

    fn discard_session(&mut self) -> Result<()> {
        if let Some(path) = self.session_file.take() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete session log: {}", path.display()))?;
        }
        Ok(())
    }

    fn close_session(&mut self) {
        self.session_file = None;
    }
}

#[derive(Debug, Default)]
struct MemoryLogState {
    general: Vec<String>,
    errors: Vec<String>,
    sessions: BTreeMap<String, Vec<String>>,
    current: Option<String>,
}

/// In-memory [`SyncLog`] for tests. Clones share the same buffers.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    state: Rc<RefCell<MemoryLogState>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn general(&self) -> Vec<String> {
        self.state.borrow().general.clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.state.borrow().errors.clone()
    }

    /// Identifiers of the session logs that still exist.
    pub fn sessions(&self) -> Vec<String> {
        self.state.borrow().sessions.keys().cloned().collect()
    }

    pub fn session_lines(&self, session_id: &str) -> Option<Vec<String>> {
        self.state.borrow().sessions.get(session_id).cloned()
    }
}

impl SyncLog for MemoryLog {
    fn message(&self, line: &str) {
        self.state.borrow_mut().general.push(line.to_string());
    }

    fn error(&self, line: &str) {
        self.state.borrow_mut().errors.push(line.to_string());
    }

    fn session(&self, line: &str) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let target = match &state.current {
            Some(id) => state.sessions.get_mut(id),
            None => None,
        };
        match target {
            Some(lines) => lines.push(line.to_string()),
            None => state.general.push(line.to_string()),
        }
    }

    fn open_session(&mut self, session_id: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.sessions.entry(session_id.to_string()).or_default();
        state.current = Some(session_id.to_string());
        Ok(())
    }

    fn has_session(&self, session_id: &str) -> bool {
        self.state.borrow().sessions.contains_key(session_id)
    }

    fn discard_session(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if let Some(id) = state.current.take() {
            state.sessions.remove(&id);
        }
        Ok(())
    }

    fn close_session(&mut self) {
        self.state.borrow_mut().current = None;
    }
}
