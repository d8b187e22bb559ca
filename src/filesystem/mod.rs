//! Filesystem capability used by the sync engine.
//!
//! The engine never calls `std::fs` directly. Everything it does to the source,
//! replica and archive trees goes through [`FileSystem`], which has a real
//! implementation ([`LocalFs`]) and an in-memory one ([`MemoryFs`]) that can
//! simulate permission failures.

mod local;
mod memory;

use anyhow::Result;
use std::io::Read;
use std::path::{Path, PathBuf};

pub use local::LocalFs;
pub use memory::MemoryFs;

/// Narrow set of filesystem operations the sync engine depends on.
pub trait FileSystem {
    /// All directories below `root` (excluding `root`), parents before children.
    fn list_dirs(&self, root: &Path) -> Result<Vec<PathBuf>>;

    /// All regular files below `root`, in the same order as [`Self::list_dirs`].
    fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>>;

    /// Entries below `root` that are neither directories nor regular files:
    /// symbolic links, fifos, sockets. Links are listed, never followed.
    fn list_special(&self, root: &Path) -> Result<Vec<PathBuf>>;

    fn is_dir(&self, path: &Path) -> bool;

    fn is_file(&self, path: &Path) -> bool;

    /// Open a file for streaming reads.
    fn open(&self, path: &Path) -> Result<Box<dyn Read + '_>>;

    /// Create a directory and any missing ancestors.
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Move a file or a directory with its subtree. The destination's parent
    /// must exist and the destination itself must not.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Copy file content from `from` to `to`, replacing `to` if it is a file.
    /// Fails if `to` is a symbolic link.
    fn copy_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Remove a regular file or a special entry.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Remove a directory and everything below it.
    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    /// Whether a directory has no entries at its top level.
    fn is_empty_dir(&self, path: &Path) -> Result<bool>;
}
