use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use walkdir::WalkDir;

use dirsync::config::LogLayout;
use dirsync::filesystem::LocalFs;
use dirsync::logger::FileLog;
use dirsync::paths::PathPolicy;
use dirsync::settings::SyncConfig;
use dirsync::status::Phase;
use dirsync::sync::{RunReport, SyncEngine};
use rstest::rstest;

/// Source, replica and logs directories inside one temporary directory.
struct Workspace {
    _temp: TempDir,
    source: PathBuf,
    replica: PathBuf,
    logs: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let replica = temp.path().join("replica");
        let logs = temp.path().join("logs");
        for dir in [&source, &replica, &logs] {
            fs::create_dir_all(dir).unwrap();
        }
        Workspace {
            _temp: temp,
            source,
            replica,
            logs,
        }
    }

    fn layout(&self) -> LogLayout {
        LogLayout::new(&self.logs)
    }

    fn engine(&self, archive_enabled: bool) -> SyncEngine {
        let config = SyncConfig {
            source: self.source.clone(),
            replica: self.replica.clone(),
            logs: self.logs.clone(),
            interval: Duration::from_secs(60),
            archive_enabled,
            path_policy: PathPolicy::CaseSensitive,
        };
        let layout = self.layout();
        layout.ensure().unwrap();
        let log = FileLog::new(layout).unwrap();
        SyncEngine::new(config, Box::new(LocalFs::new()), Box::new(log))
    }

    fn write_source(&self, relative: &str, content: &str) {
        write(&self.source.join(relative), content);
    }

    fn write_replica(&self, relative: &str, content: &str) {
        write(&self.replica.join(relative), content);
    }

    fn archive_of(&self, report: &RunReport) -> PathBuf {
        self.layout().archive_dir().join(&report.session_id)
    }
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Every entry below `root` as `relative path -> Some(content)` for files and
/// `None` for directories.
fn tree(root: &Path) -> Vec<(PathBuf, Option<String>)> {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .map(|entry| {
            let entry = entry.unwrap();
            let relative = entry.path().strip_prefix(root).unwrap().to_path_buf();
            let content = if entry.file_type().is_file() {
                Some(fs::read_to_string(entry.path()).unwrap())
            } else {
                None
            };
            (relative, content)
        })
        .collect()
}

#[test]
fn test_initial_sync_then_steady_state() {
    let ws = Workspace::new();
    ws.write_source("a.txt", "hello");
    ws.write_source("sub/b.txt", "world");
    let mut engine = ws.engine(true);

    let first = engine.run().unwrap();

    assert!(first.success());
    assert_eq!(first.mutations(), 3);
    assert_eq!(fs::read_to_string(ws.replica.join("a.txt")).unwrap(), "hello");
    assert_eq!(fs::read_to_string(ws.replica.join("sub/b.txt")).unwrap(), "world");
    assert!(first.log_retained);
    assert!(ws.layout().session_log_file(&first.session_id).exists());
    assert!(!first.archive_retained);
    assert!(!ws.archive_of(&first).exists());

    let second = engine.run().unwrap();

    assert!(second.success());
    assert_eq!(second.mutations(), 0);
    assert_ne!(first.session_id, second.session_id);
    assert!(!ws.layout().session_log_file(&second.session_id).exists());
    assert!(!ws.archive_of(&second).exists());
    assert_eq!(tree(&ws.source), tree(&ws.replica));
}

#[rstest]
#[case::archiving(true)]
#[case::deleting(false)]
fn test_replica_converges_to_source(#[case] archive_enabled: bool) {
    let ws = Workspace::new();
    ws.write_source("keep.txt", "same");
    ws.write_source("edit.txt", "new content");
    ws.write_source("nested/deep/add.txt", "added");
    fs::create_dir_all(ws.source.join("empty")).unwrap();

    ws.write_replica("keep.txt", "same");
    ws.write_replica("edit.txt", "old content");
    ws.write_replica("stale.txt", "stale");
    ws.write_replica("gone/inner/file.txt", "gone");

    let mut engine = ws.engine(archive_enabled);
    let report = engine.run().unwrap();

    assert!(report.success());
    assert_eq!(tree(&ws.source), tree(&ws.replica));

    let archive = ws.archive_of(&report);
    if archive_enabled {
        assert_eq!(fs::read_to_string(archive.join("edit.txt")).unwrap(), "old content");
        assert_eq!(fs::read_to_string(archive.join("stale.txt")).unwrap(), "stale");
        assert_eq!(
            fs::read_to_string(archive.join("gone/inner/file.txt")).unwrap(),
            "gone"
        );
        assert!(report.archive_retained);
    } else {
        assert!(!archive.exists());
        assert!(!report.archive_retained);
    }

    let again = engine.run().unwrap();
    assert_eq!(again.mutations(), 0);
}

#[test]
fn test_changed_file_present_at_end_of_run_without_archive() {
    let ws = Workspace::new();
    ws.write_source("doc.txt", "v2");
    ws.write_replica("doc.txt", "v1");
    let mut engine = ws.engine(false);

    let report = engine.run().unwrap();

    assert!(report.success());
    assert_eq!(fs::read_to_string(ws.replica.join("doc.txt")).unwrap(), "v2");
    assert_eq!(report.phase(Phase::ReplaceEditedFiles).unwrap().mutations, 1);
    assert_eq!(report.phase(Phase::ImportMissingFiles).unwrap().mutations, 1);
}

#[test]
fn test_unchanged_file_keeps_its_modification_time() {
    let ws = Workspace::new();
    ws.write_source("same.txt", "identical");
    ws.write_replica("same.txt", "identical");
    let before = fs::metadata(ws.replica.join("same.txt"))
        .unwrap()
        .modified()
        .unwrap();
    let mut engine = ws.engine(true);

    let report = engine.run().unwrap();

    assert_eq!(report.mutations(), 0);
    let after = fs::metadata(ws.replica.join("same.txt"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_session_lines_land_in_session_log() {
    let ws = Workspace::new();
    ws.write_source("a.txt", "hello");
    let mut engine = ws.engine(true);

    let report = engine.run().unwrap();

    let session = fs::read_to_string(ws.layout().session_log_file(&report.session_id)).unwrap();
    assert!(session.contains("Importing missing files..."));
    assert!(session.contains("> Copied file from"));
    assert!(session.contains("Was synchronization successful? >> true <<"));

    let general = fs::read_to_string(ws.layout().general_log_file()).unwrap();
    assert!(general.contains(&format!("Starting sync session {}", report.session_id)));
    assert!(!general.contains("> Copied file from"));
}

#[cfg(unix)]
#[test]
fn test_unreadable_file_fails_only_its_own_operation() {
    use std::os::unix::fs::PermissionsExt;

    let ws = Workspace::new();
    ws.write_source("locked/secret.txt", "new");
    ws.write_replica("locked/secret.txt", "old");
    ws.write_source("free.txt", "fresh");
    let locked = ws.source.join("locked/secret.txt");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Root ignores permission bits.
    if fs::read(&locked).is_ok() {
        return;
    }

    let mut engine = ws.engine(true);
    let report = engine.run().unwrap();

    assert!(!report.success());
    assert_eq!(report.failures().count(), 1);
    assert_eq!(fs::read_to_string(ws.replica.join("free.txt")).unwrap(), "fresh");
    assert_eq!(
        fs::read_to_string(ws.replica.join("locked/secret.txt")).unwrap(),
        "old"
    );
    let errors = fs::read_to_string(ws.layout().error_log_file()).unwrap();
    assert!(errors.contains("secret.txt"));

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
}

#[test]
fn test_archive_turned_on_between_runs() {
    let ws = Workspace::new();
    ws.write_source("a.txt", "hello");
    ws.write_source("sub/b.txt", "world");

    let first = ws.engine(false).run().unwrap();

    assert!(first.success());
    assert!(!first.archive_retained);
    assert!(!ws.archive_of(&first).exists());
    assert_eq!(tree(&ws.source), tree(&ws.replica));

    ws.write_source("a.txt", "hello2");
    let second = ws.engine(true).run().unwrap();

    assert!(second.success());
    assert_eq!(fs::read_to_string(ws.replica.join("a.txt")).unwrap(), "hello2");
    assert!(second.archive_retained);
    let archive = ws.archive_of(&second);
    assert_eq!(fs::read_to_string(archive.join("a.txt")).unwrap(), "hello");
    assert!(!archive.join("sub").exists());
    assert_eq!(tree(&ws.source), tree(&ws.replica));
}

#[cfg(unix)]
#[test]
fn test_replica_symlinks_are_archived_and_never_written_through() {
    use std::os::unix::fs::symlink;

    let ws = Workspace::new();
    let outside = ws.replica.parent().unwrap().join("outside.txt");
    fs::write(&outside, "precious").unwrap();
    ws.write_source("x.txt", "new");
    symlink("../outside.txt", ws.replica.join("x.txt")).unwrap();
    symlink(&outside, ws.replica.join("stale_link")).unwrap();
    let mut engine = ws.engine(true);

    let first = engine.run().unwrap();

    assert!(first.success());
    assert_eq!(fs::read_to_string(&outside).unwrap(), "precious");
    let replaced = ws.replica.join("x.txt");
    assert!(fs::symlink_metadata(&replaced).unwrap().file_type().is_file());
    assert_eq!(fs::read_to_string(&replaced).unwrap(), "new");
    assert!(fs::symlink_metadata(ws.replica.join("stale_link")).is_err());
    let archive = ws.archive_of(&first);
    assert!(fs::symlink_metadata(archive.join("x.txt"))
        .unwrap()
        .file_type()
        .is_symlink());
    assert!(fs::symlink_metadata(archive.join("stale_link"))
        .unwrap()
        .file_type()
        .is_symlink());
    assert_eq!(tree(&ws.source), tree(&ws.replica));

    let second = engine.run().unwrap();

    assert!(second.success());
    assert_eq!(second.mutations(), 0);
    assert!(!second.log_retained);
    assert_eq!(fs::read_to_string(&outside).unwrap(), "precious");
}

#[cfg(unix)]
#[test]
fn test_replica_directory_symlink_is_replaced_by_a_real_directory() {
    use std::os::unix::fs::symlink;

    let ws = Workspace::new();
    let elsewhere = ws.replica.parent().unwrap().join("elsewhere");
    fs::create_dir_all(&elsewhere).unwrap();
    ws.write_source("d/inner.txt", "inner");
    symlink(&elsewhere, ws.replica.join("d")).unwrap();

    let report = ws.engine(false).run().unwrap();

    assert!(report.success());
    assert!(fs::symlink_metadata(ws.replica.join("d")).unwrap().is_dir());
    assert_eq!(fs::read_to_string(ws.replica.join("d/inner.txt")).unwrap(), "inner");
    assert!(!elsewhere.join("inner.txt").exists());
}
