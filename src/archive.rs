use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

use crate::filesystem::FileSystem;
use crate::logger::SyncLog;
use crate::status::PhaseOutcome;

pub const SESSION_PREFIX: &str = "Sync_Session_";

/// Session identifier for a run started at `started`, with second precision.
pub fn session_id_for(started: &DateTime<Local>) -> String {
    format!("{SESSION_PREFIX}{}", started.format("%Y-%m-%d_%H-%M-%S"))
}

/// One sync run: its identifier, its archive directory, and how many
/// mutations it has performed so far.
///
/// The archive directory is created when the session begins and removed by
/// [`SyncSession::finish`] if nothing was archived into it.
#[derive(Debug)]
pub struct SyncSession {
    id: String,
    archive_dir: PathBuf,
    mutations: usize,
}

/// What [`SyncSession::finish`] kept on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCleanup {
    pub log_retained: bool,
    pub archive_retained: bool,
}

impl SyncSession {
    /// Start a session: pick an unused identifier, create its archive
    /// directory under `archive_root`, and open its session log.
    ///
    /// Runs started within the same second get `_2`, `_3`, ... appended so
    /// that no two sessions share an archive directory or a session log.
    pub fn begin(
        fs: &dyn FileSystem,
        log: &mut dyn SyncLog,
        archive_root: &Path,
        started: DateTime<Local>,
    ) -> Result<Self> {
        let base = session_id_for(&started);
        let mut id = base.clone();
        let mut suffix = 1;
        while is_taken(fs, &*log, archive_root, &id) {
            suffix += 1;
            id = format!("{base}_{suffix}");
        }

        let archive_dir = archive_root.join(&id);
        fs.create_dir_all(&archive_dir).with_context(|| {
            format!("Failed to create session archive: {}", archive_dir.display())
        })?;
        if let Err(e) = log.open_session(&id) {
            if let Err(cleanup) = fs.remove_dir_all(&archive_dir) {
                log.error(&format!(
                    "Failed to delete unused archive {}: {cleanup:#}",
                    archive_dir.display()
                ));
            }
            return Err(e);
        }

        Ok(SyncSession {
            id,
            archive_dir,
            mutations: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    pub fn record(&mut self, outcome: &PhaseOutcome) {
        self.mutations += outcome.mutations;
    }

    pub fn mutated(&self) -> bool {
        self.mutations > 0
    }

    /// Close the session: drop the session log if nothing was mutated and
    /// remove the archive directory if it has no top-level entries.
    ///
    /// Failures are reported to the error log and leave the item in place.
    pub fn finish(self, fs: &dyn FileSystem, log: &mut dyn SyncLog) -> SessionCleanup {
        let log_retained = if self.mutated() {
            log.close_session();
            true
        } else {
            match log.discard_session() {
                Ok(()) => false,
                Err(e) => {
                    log.close_session();
                    log.error(&format!("Failed to delete session log {}: {e:#}", self.id));
                    true
                }
            }
        };

        let archive_retained = match fs.is_empty_dir(&self.archive_dir) {
            Ok(true) => match fs.remove_dir_all(&self.archive_dir) {
                Ok(()) => false,
                Err(e) => {
                    log.error(&format!(
                        "Failed to delete empty archive {}: {e:#}",
                        self.archive_dir.display()
                    ));
                    true
                }
            },
            Ok(false) => true,
            Err(e) => {
                log.error(&format!(
                    "Failed to inspect archive {}: {e:#}",
                    self.archive_dir.display()
                ));
                true
            }
        };

        SessionCleanup {
            log_retained,
            archive_retained,
        }
    }
}

fn is_taken(fs: &dyn FileSystem, log: &dyn SyncLog, archive_root: &Path, id: &str) -> bool {
    let dir = archive_root.join(id);
    fs.is_dir(&dir) || fs.is_file(&dir) || log.has_session(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::MemoryFs;
    use crate::logger::MemoryLog;
    use crate::status::{Operation, Phase};
    use chrono::TimeZone;

    fn started() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn test_session_id_format() {
        assert_eq!(session_id_for(&started()), "Sync_Session_2024-03-09_14-05-07");
    }

    #[test]
    fn test_begin_creates_archive_and_log() {
        let fs = MemoryFs::new();
        fs.mkdir("/archive");
        let mut log = MemoryLog::new();

        let session = SyncSession::begin(&fs, &mut log, Path::new("/archive"), started()).unwrap();

        assert_eq!(session.id(), "Sync_Session_2024-03-09_14-05-07");
        assert!(fs.is_dir(session.archive_dir()));
        assert_eq!(log.sessions(), vec![session.id().to_string()]);
        assert!(!session.mutated());
    }

    #[test]
    fn test_same_second_sessions_get_distinct_ids() {
        let fs = MemoryFs::new();
        fs.mkdir("/archive");
        let mut log = MemoryLog::new();

        let first = SyncSession::begin(&fs, &mut log, Path::new("/archive"), started()).unwrap();
        let second = SyncSession::begin(&fs, &mut log, Path::new("/archive"), started()).unwrap();
        let third = SyncSession::begin(&fs, &mut log, Path::new("/archive"), started()).unwrap();

        assert_eq!(second.id(), format!("{}_2", first.id()));
        assert_eq!(third.id(), format!("{}_3", first.id()));
    }

    #[test]
    fn test_retained_log_blocks_reuse_of_id() {
        let fs = MemoryFs::new();
        fs.mkdir("/archive");
        let mut log = MemoryLog::new();

        let mut first = SyncSession::begin(&fs, &mut log, Path::new("/archive"), started()).unwrap();
        let mut outcome = PhaseOutcome::new(Phase::ImportMissingFiles);
        outcome.record_success(Operation::CopyFile);
        first.record(&outcome);
        let cleanup = first.finish(&fs, &mut log);
        assert!(cleanup.log_retained);
        assert!(!cleanup.archive_retained);

        let second = SyncSession::begin(&fs, &mut log, Path::new("/archive"), started()).unwrap();
        assert!(second.id().ends_with("_2"));
    }

    #[test]
    fn test_finish_without_mutations_removes_everything() {
        let fs = MemoryFs::new();
        fs.mkdir("/archive");
        let mut log = MemoryLog::new();

        let session = SyncSession::begin(&fs, &mut log, Path::new("/archive"), started()).unwrap();
        let dir = session.archive_dir().to_path_buf();
        let cleanup = session.finish(&fs, &mut log);

        assert_eq!(
            cleanup,
            SessionCleanup {
                log_retained: false,
                archive_retained: false
            }
        );
        assert!(!fs.exists(&dir));
        assert!(log.sessions().is_empty());
    }

    #[test]
    fn test_finish_keeps_populated_archive() {
        let fs = MemoryFs::new();
        fs.mkdir("/archive");
        let mut log = MemoryLog::new();

        let mut session =
            SyncSession::begin(&fs, &mut log, Path::new("/archive"), started()).unwrap();
        fs.write(session.archive_dir().join("old.txt"), "old");
        let mut outcome = PhaseOutcome::new(Phase::RemoveOverheadFiles);
        outcome.record_success(Operation::ArchiveFile);
        session.record(&outcome);

        let dir = session.archive_dir().to_path_buf();
        let cleanup = session.finish(&fs, &mut log);

        assert!(cleanup.archive_retained);
        assert!(cleanup.log_retained);
        assert_eq!(fs.read(dir.join("old.txt")), Some(b"old".to_vec()));
    }

    #[test]
    fn test_begin_fails_when_archive_root_is_denied() {
        let fs = MemoryFs::new();
        fs.mkdir("/archive");
        fs.deny("/archive");
        let mut log = MemoryLog::new();

        assert!(SyncSession::begin(&fs, &mut log, Path::new("/archive"), started()).is_err());
        assert!(log.sessions().is_empty());
    }

    /// A log whose session files can never be created.
    struct ReadOnlyLog(MemoryLog);

    impl SyncLog for ReadOnlyLog {
        fn message(&self, line: &str) {
            self.0.message(line);
        }

        fn error(&self, line: &str) {
            self.0.error(line);
        }

        fn session(&self, line: &str) {
            self.0.session(line);
        }

        fn open_session(&mut self, session_id: &str) -> Result<()> {
            anyhow::bail!("Failed to create session log: {session_id}.log")
        }

        fn has_session(&self, session_id: &str) -> bool {
            self.0.has_session(session_id)
        }

        fn discard_session(&mut self) -> Result<()> {
            self.0.discard_session()
        }

        fn close_session(&mut self) {
            self.0.close_session();
        }
    }

    #[test]
    fn test_failed_session_log_leaves_no_archive_behind() {
        let fs = MemoryFs::new();
        fs.mkdir("/archive");
        let mut log = ReadOnlyLog(MemoryLog::new());

        for _ in 0..3 {
            assert!(SyncSession::begin(&fs, &mut log, Path::new("/archive"), started()).is_err());
        }

        assert!(fs.is_empty_dir(Path::new("/archive")).unwrap());
    }
}
