use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::filesystem::FileSystem;
use crate::paths::PathPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Directory,
    File,
    /// Symbolic links and other entries that are never mirrored.
    Special,
}

/// Entries of one kind below a tree root, addressed by relative path.
///
/// Lookups go through the [`PathPolicy`] key, so a relative path taken from
/// the source tree finds its counterpart in the replica tree.
#[derive(Debug)]
pub(crate) struct TreeIndex {
    policy: PathPolicy,
    relatives: Vec<PathBuf>,
    by_key: HashMap<PathBuf, usize>,
}

impl TreeIndex {
    pub(crate) fn scan(
        fs: &dyn FileSystem,
        root: &Path,
        kind: EntryKind,
        policy: PathPolicy,
    ) -> Result<Self> {
        let listed = match kind {
            EntryKind::Directory => fs.list_dirs(root)?,
            EntryKind::File => fs.list_files(root)?,
            EntryKind::Special => fs.list_special(root)?,
        };

        let mut index = TreeIndex {
            policy,
            relatives: Vec::with_capacity(listed.len()),
            by_key: HashMap::with_capacity(listed.len()),
        };
        for path in listed {
            let relative = path.strip_prefix(root)?.to_path_buf();
            let key = policy.key(&relative);
            index.by_key.entry(key).or_insert(index.relatives.len());
            index.relatives.push(relative);
        }
        Ok(index)
    }

    /// Relative paths in listing order (parents before children).
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Path> {
        self.relatives.iter().map(PathBuf::as_path)
    }

    pub(crate) fn contains(&self, relative: &Path) -> bool {
        self.by_key.contains_key(&self.policy.key(relative))
    }

    /// This tree's spelling of the entry matching `relative`.
    pub(crate) fn get(&self, relative: &Path) -> Option<&Path> {
        self.by_key
            .get(&self.policy.key(relative))
            .map(|&i| self.relatives[i].as_path())
    }

    /// Where `relative` belongs in this tree: its parent directory is spelled
    /// the way this tree already spells it, its own name is kept.
    pub(crate) fn place(&self, root: &Path, relative: &Path) -> PathBuf {
        let parent = relative.parent().filter(|p| !p.as_os_str().is_empty());
        match (parent, relative.file_name()) {
            (Some(parent), Some(name)) => root
                .join(self.get(parent).unwrap_or(parent))
                .join(name),
            _ => root.join(relative),
        }
    }
}
