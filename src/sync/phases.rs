//! The five phases of a sync run.
//!
//! Each phase re-scans the trees it needs, so it always works from the state
//! the previous phases left behind. A failing sub-operation is logged and
//! recorded in the phase's [`PhaseOutcome`]; the phase then moves on to the
//! next entry.

use anyhow::Result;
use std::path::Path;

use super::tree::{EntryKind, TreeIndex};
use crate::filesystem::FileSystem;
use crate::hash;
use crate::logger::SyncLog;
use crate::paths::PathPolicy;
use crate::status::{Operation, Phase, PhaseOutcome};

const SEPARATOR: &str = "------------------------------------------------";

/// Everything a phase needs from the running engine.
pub(crate) struct PhaseContext<'a> {
    pub(crate) fs: &'a dyn FileSystem,
    pub(crate) log: &'a dyn SyncLog,
    pub(crate) source: &'a Path,
    pub(crate) replica: &'a Path,
    /// Session archive directory, or `None` when archiving is disabled.
    pub(crate) archive: Option<&'a Path>,
    pub(crate) policy: PathPolicy,
}

pub(crate) fn run_phase(phase: Phase, ctx: &PhaseContext<'_>) -> PhaseOutcome {
    match phase {
        Phase::PruneDirectories => prune_directories(ctx),
        Phase::RecreateDirectories => recreate_directories(ctx),
        Phase::RemoveOverheadFiles => remove_overhead_files(ctx),
        Phase::ReplaceEditedFiles => replace_edited_files(ctx),
        Phase::ImportMissingFiles => import_missing_files(ctx),
    }
}

impl PhaseContext<'_> {
    fn header(&self, title: &str) {
        self.log.session(SEPARATOR);
        self.log.session(title);
    }

    fn scan(&self, outcome: &mut PhaseOutcome, root: &Path, kind: EntryKind) -> Option<TreeIndex> {
        let result = TreeIndex::scan(self.fs, root, kind, self.policy);
        self.attempt(
            outcome,
            Operation::Scan,
            root,
            result,
            None,
            &format!("> Failed to scan {}.", root.display()),
        )
    }

    /// Record `result` in `outcome`; log `done` to the session log on success
    /// and `failed` with the cause to the error log otherwise.
    fn attempt<T>(
        &self,
        outcome: &mut PhaseOutcome,
        operation: Operation,
        path: &Path,
        result: Result<T>,
        done: Option<String>,
        failed: &str,
    ) -> Option<T> {
        match result {
            Ok(value) => {
                outcome.record_success(operation);
                if let Some(line) = done {
                    self.log.session(&line);
                }
                Some(value)
            }
            Err(e) => {
                self.log.error(&format!("{failed} Error: {e:#}"));
                outcome.record_failure(operation, path, &e);
                None
            }
        }
    }

    /// Move `path` to `target`, creating the missing ancestors of `target`.
    fn move_into_archive(&self, path: &Path, target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            if !self.fs.is_dir(parent) {
                self.fs.create_dir_all(parent)?;
            }
        }
        self.fs.rename(path, target)
    }

    /// Archive or delete an overhead replica entry.
    fn discard(&self, outcome: &mut PhaseOutcome, path: &Path, relative: &Path, kind: EntryKind) {
        let noun = match kind {
            EntryKind::Directory => "directory",
            EntryKind::File => "file",
            EntryKind::Special => "link",
        };

        match self.archive {
            Some(archive) => {
                let target = archive.join(relative);
                let operation = match kind {
                    EntryKind::Directory => Operation::ArchiveDirectory,
                    EntryKind::File | EntryKind::Special => Operation::ArchiveFile,
                };
                self.attempt(
                    outcome,
                    operation,
                    path,
                    self.move_into_archive(path, &target),
                    Some(format!(
                        "> Moved {noun} from {} to {}.",
                        path.display(),
                        target.display()
                    )),
                    &format!(
                        "> Failed to move {noun} from {} to {}.",
                        path.display(),
                        target.display()
                    ),
                );
            }
            None => {
                let (operation, result) = match kind {
                    EntryKind::Directory => (Operation::DeleteDirectory, self.fs.remove_dir_all(path)),
                    EntryKind::File | EntryKind::Special => {
                        (Operation::DeleteFile, self.fs.remove_file(path))
                    }
                };
                self.attempt(
                    outcome,
                    operation,
                    path,
                    result,
                    Some(format!("> Deleted {noun} {}.", path.display())),
                    &format!("> Failed to delete {noun} {}.", path.display()),
                );
            }
        }
    }

    fn copy(&self, outcome: &mut PhaseOutcome, from: &Path, to: &Path) -> bool {
        self.attempt(
            outcome,
            Operation::CopyFile,
            to,
            self.fs.copy_file(from, to),
            Some(format!("> Copied file from {} to {}.", from.display(), to.display())),
            &format!("> Failed to copy file from {} to {}.", from.display(), to.display()),
        )
        .is_some()
    }
}

/// Phase 1: remove replica directories that have no source counterpart.
///
/// Symbolic links and other special entries in the replica are removed here
/// as well, before anything is written below them.
fn prune_directories(ctx: &PhaseContext<'_>) -> PhaseOutcome {
    let mut outcome = PhaseOutcome::new(Phase::PruneDirectories);
    ctx.header(if ctx.archive.is_some() {
        "Moving overhead directories to archive..."
    } else {
        "Deleting overhead directories..."
    });

    let Some(replica_special) = ctx.scan(&mut outcome, ctx.replica, EntryKind::Special) else {
        return outcome;
    };
    for relative in replica_special.iter() {
        let path = ctx.replica.join(relative);
        ctx.discard(&mut outcome, &path, relative, EntryKind::Special);
    }

    let Some(replica_dirs) = ctx.scan(&mut outcome, ctx.replica, EntryKind::Directory) else {
        return outcome;
    };
    let Some(source_dirs) = ctx.scan(&mut outcome, ctx.source, EntryKind::Directory) else {
        return outcome;
    };

    for relative in replica_dirs.iter() {
        if source_dirs.contains(relative) {
            continue;
        }
        let path = ctx.replica.join(relative);
        // Already gone with an overhead ancestor.
        if !ctx.fs.is_dir(&path) {
            continue;
        }
        ctx.discard(&mut outcome, &path, relative, EntryKind::Directory);
    }

    outcome
}

/// Phase 2: create source directories missing from the replica.
fn recreate_directories(ctx: &PhaseContext<'_>) -> PhaseOutcome {
    let mut outcome = PhaseOutcome::new(Phase::RecreateDirectories);
    ctx.header("Recreating missing directories structure...");

    let Some(source_dirs) = ctx.scan(&mut outcome, ctx.source, EntryKind::Directory) else {
        return outcome;
    };
    let Some(replica_dirs) = ctx.scan(&mut outcome, ctx.replica, EntryKind::Directory) else {
        return outcome;
    };

    for relative in source_dirs.iter() {
        if replica_dirs.contains(relative) {
            continue;
        }
        let target = replica_dirs.place(ctx.replica, relative);
        if ctx.fs.is_dir(&target) {
            continue;
        }
        ctx.attempt(
            &mut outcome,
            Operation::CreateDirectory,
            &target,
            ctx.fs.create_dir_all(&target),
            Some(format!("> Created directory {}.", target.display())),
            &format!("> Failed to create directory {}.", target.display()),
        );
    }

    outcome
}

/// Phase 3: remove replica files that have no source counterpart.
fn remove_overhead_files(ctx: &PhaseContext<'_>) -> PhaseOutcome {
    let mut outcome = PhaseOutcome::new(Phase::RemoveOverheadFiles);
    ctx.header(if ctx.archive.is_some() {
        "Moving overhead files to archive..."
    } else {
        "Deleting overhead files..."
    });

    let Some(replica_files) = ctx.scan(&mut outcome, ctx.replica, EntryKind::File) else {
        return outcome;
    };
    let Some(source_files) = ctx.scan(&mut outcome, ctx.source, EntryKind::File) else {
        return outcome;
    };

    for relative in replica_files.iter() {
        if source_files.contains(relative) {
            continue;
        }
        let path = ctx.replica.join(relative);
        ctx.discard(&mut outcome, &path, relative, EntryKind::File);
    }

    outcome
}

/// Phase 4: replace replica files whose content differs from the source.
fn replace_edited_files(ctx: &PhaseContext<'_>) -> PhaseOutcome {
    let mut outcome = PhaseOutcome::new(Phase::ReplaceEditedFiles);
    ctx.header(if ctx.archive.is_some() {
        "Moving changed files to archive..."
    } else {
        "Deleting changed files..."
    });

    let Some(replica_files) = ctx.scan(&mut outcome, ctx.replica, EntryKind::File) else {
        return outcome;
    };
    let Some(source_files) = ctx.scan(&mut outcome, ctx.source, EntryKind::File) else {
        return outcome;
    };

    for relative in replica_files.iter() {
        let Some(source_relative) = source_files.get(relative) else {
            continue;
        };
        let replica_path = ctx.replica.join(relative);
        let source_path = ctx.source.join(source_relative);

        let Some(replica_digest) = ctx.attempt(
            &mut outcome,
            Operation::Fingerprint,
            &replica_path,
            hash::fingerprint_file(ctx.fs, &replica_path),
            None,
            &format!("> Failed to fingerprint {}.", replica_path.display()),
        ) else {
            continue;
        };
        let Some(source_digest) = ctx.attempt(
            &mut outcome,
            Operation::Fingerprint,
            &source_path,
            hash::fingerprint_file(ctx.fs, &source_path),
            None,
            &format!("> Failed to fingerprint {}.", source_path.display()),
        ) else {
            continue;
        };

        if replica_digest == source_digest {
            continue;
        }

        match ctx.archive {
            Some(archive) => {
                let target = archive.join(relative);
                let moved = ctx.attempt(
                    &mut outcome,
                    Operation::ArchiveFile,
                    &replica_path,
                    ctx.move_into_archive(&replica_path, &target),
                    Some(format!(
                        "> Moved file from {} to {}.",
                        replica_path.display(),
                        target.display()
                    )),
                    &format!(
                        "> Failed to move file from {} to {}.",
                        replica_path.display(),
                        target.display()
                    ),
                );
                // Never write over a replica file that could not be archived.
                if moved.is_some() {
                    ctx.copy(&mut outcome, &source_path, &replica_path);
                }
            }
            // Phase 5 imports the fresh copy.
            None => ctx.discard(&mut outcome, &replica_path, relative, EntryKind::File),
        }
    }

    outcome
}

/// Phase 5: copy source files missing from the replica.
fn import_missing_files(ctx: &PhaseContext<'_>) -> PhaseOutcome {
    let mut outcome = PhaseOutcome::new(Phase::ImportMissingFiles);
    ctx.header("Importing missing files...");

    let Some(source_files) = ctx.scan(&mut outcome, ctx.source, EntryKind::File) else {
        return outcome;
    };
    let Some(replica_files) = ctx.scan(&mut outcome, ctx.replica, EntryKind::File) else {
        return outcome;
    };
    let Some(replica_dirs) = ctx.scan(&mut outcome, ctx.replica, EntryKind::Directory) else {
        return outcome;
    };

    for relative in source_files.iter() {
        if replica_files.contains(relative) {
            continue;
        }
        let source_path = ctx.source.join(relative);
        let target = replica_dirs.place(ctx.replica, relative);
        let parent = relative.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent.filter(|p| !replica_dirs.contains(p)) {
            let missing = anyhow::anyhow!(
                "Replica directory is missing: {}",
                ctx.replica.join(parent).display()
            );
            ctx.attempt::<()>(
                &mut outcome,
                Operation::CopyFile,
                &target,
                Err(missing),
                None,
                &format!(
                    "> Failed to copy file from {} to {}.",
                    source_path.display(),
                    target.display()
                ),
            );
            continue;
        }
        ctx.copy(&mut outcome, &source_path, &target);
    }

    outcome
}
