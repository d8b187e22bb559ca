use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::FileSystem;

/// [`FileSystem`] backed by the real disk.
///
/// Symbolic links are never followed. Listing fails as a whole if any entry
/// below the root cannot be read.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Listing {
    Dirs,
    Files,
    Special,
}

impl LocalFs {
    pub fn new() -> Self {
        LocalFs
    }

    fn walk(root: &Path, listing: Listing) -> Result<Vec<PathBuf>> {
        if !root.is_dir() {
            bail!("Not a directory: {}", root.display());
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            // Never return a partial listing.
            let entry = entry
                .with_context(|| format!("Failed to read directory tree: {}", root.display()))?;

            let file_type = entry.file_type();
            let wanted = match listing {
                Listing::Dirs => file_type.is_dir(),
                Listing::Files => file_type.is_file(),
                Listing::Special => !file_type.is_dir() && !file_type.is_file(),
            };
            if wanted {
                found.push(entry.into_path());
            }
        }

        Ok(found)
    }
}

impl FileSystem for LocalFs {
    fn list_dirs(&self, root: &Path) -> Result<Vec<PathBuf>> {
        Self::walk(root, Listing::Dirs)
    }

    fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        Self::walk(root, Listing::Files)
    }

    fn list_special(&self, root: &Path) -> Result<Vec<PathBuf>> {
        Self::walk(root, Listing::Special)
    }

    fn is_dir(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).map(|m| m.is_dir()).unwrap_or(false)
    }

    fn is_file(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).map(|m| m.is_file()).unwrap_or(false)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + '_>> {
        let file = fs::File::open(path)
            .with_context(|| format!("Failed to open file: {}", path.display()))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        if is_symlink(path) {
            bail!("A symbolic link is in the way of directory: {}", path.display());
        }
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if fs::symlink_metadata(to).is_ok() {
            bail!("Destination already exists: {}", to.display());
        }

        match fs::rename(from, to) {
            Ok(()) => Ok(()),
            // The archive may live on another volume than the replica.
            Err(e) if is_cross_device(&e) => move_across_devices(from, to),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to move {} to {}", from.display(), to.display())
            }),
        }
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        if is_symlink(to) {
            bail!("Refusing to write through symbolic link: {}", to.display());
        }
        fs::copy(from, to)
            .map(|_| ())
            .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)
            .with_context(|| format!("Failed to delete file: {}", path.display()))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path)
            .with_context(|| format!("Failed to delete directory: {}", path.display()))
    }

    fn is_empty_dir(&self, path: &Path) -> Result<bool> {
        let mut entries = fs::read_dir(path)
            .with_context(|| format!("Failed to read directory: {}", path.display()))?;
        Ok(entries.next().is_none())
    }
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        // EXDEV
        err.raw_os_error() == Some(18)
    }

    #[cfg(windows)]
    {
        // ERROR_NOT_SAME_DEVICE
        err.raw_os_error() == Some(17)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = err;
        false
    }
}

/// Copy then delete, for moves that `rename` cannot do atomically.
fn move_across_devices(from: &Path, to: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(from)
        .with_context(|| format!("Failed to inspect {}", from.display()))?;

    if metadata.file_type().is_symlink() {
        copy_link(from, to)?;
        fs::remove_file(from).with_context(|| format!("Failed to delete link: {}", from.display()))
    } else if metadata.is_dir() {
        for entry in WalkDir::new(from).follow_links(false) {
            let entry = entry.with_context(|| format!("Failed to read {}", from.display()))?;
            let relative = entry.path().strip_prefix(from)?;
            let target = to.join(relative);

            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)
                    .with_context(|| format!("Failed to create directory: {}", target.display()))?;
            } else if entry.file_type().is_file() {
                fs::copy(entry.path(), &target).with_context(|| {
                    format!("Failed to copy {} to {}", entry.path().display(), target.display())
                })?;
            } else if entry.file_type().is_symlink() {
                copy_link(entry.path(), &target)?;
            }
        }
        fs::remove_dir_all(from)
            .with_context(|| format!("Failed to delete directory: {}", from.display()))
    } else {
        fs::copy(from, to)
            .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
        fs::remove_file(from).with_context(|| format!("Failed to delete file: {}", from.display()))
    }
}

/// Recreate the symbolic link `from` at `to`, pointing at the same target.
fn copy_link(from: &Path, to: &Path) -> Result<()> {
    let target =
        fs::read_link(from).with_context(|| format!("Failed to read link: {}", from.display()))?;

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(&target, to)
            .with_context(|| format!("Failed to create link: {}", to.display()))
    }

    #[cfg(not(unix))]
    {
        bail!(
            "Cannot move link {} -> {} across devices",
            from.display(),
            target.display()
        )
    }
}
