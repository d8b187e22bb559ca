use anyhow::{anyhow, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::FileSystem;

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
    /// Symbolic link; the target is recorded but never resolved.
    Link(PathBuf),
}

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<PathBuf, Node>,
    denied: BTreeSet<PathBuf>,
}

/// In-memory [`FileSystem`] for tests.
///
/// Clones share the same tree, so a test can hand one clone to the engine and
/// inspect the result through another. Paths marked with [`MemoryFs::deny`]
/// (and everything below them) fail every read and mutation with
/// `PermissionDenied`.
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    tree: Rc<RefCell<Tree>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory and its ancestors, bypassing denial rules.
    pub fn mkdir(&self, path: impl AsRef<Path>) {
        let mut tree = self.tree.borrow_mut();
        for ancestor in path.as_ref().ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            tree.nodes.entry(ancestor.to_path_buf()).or_insert(Node::Dir);
        }
    }

    /// Write a file, creating its parent directories, bypassing denial rules.
    pub fn write(&self, path: impl AsRef<Path>, content: impl AsRef<[u8]>) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.mkdir(parent);
        }
        self.tree
            .borrow_mut()
            .nodes
            .insert(path.to_path_buf(), Node::File(content.as_ref().to_vec()));
    }

    /// Create a symbolic link at `path`, creating its parent directories.
    pub fn symlink(&self, path: impl AsRef<Path>, target: impl AsRef<Path>) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.mkdir(parent);
        }
        self.tree
            .borrow_mut()
            .nodes
            .insert(path.to_path_buf(), Node::Link(target.as_ref().to_path_buf()));
    }

    pub fn is_link(&self, path: impl AsRef<Path>) -> bool {
        matches!(self.tree.borrow().nodes.get(path.as_ref()), Some(Node::Link(_)))
    }

    /// Current content of a file, if it exists.
    pub fn read(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.tree.borrow().nodes.get(path.as_ref()) {
            Some(Node::File(content)) => Some(content.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.tree.borrow().nodes.contains_key(path.as_ref())
    }

    /// Make every operation touching `path` or its descendants fail.
    pub fn deny(&self, path: impl AsRef<Path>) {
        self.tree
            .borrow_mut()
            .denied
            .insert(path.as_ref().to_path_buf());
    }

    /// Files below `root` keyed by their path relative to `root`.
    pub fn snapshot(&self, root: impl AsRef<Path>) -> BTreeMap<PathBuf, Vec<u8>> {
        let root = root.as_ref();
        self.tree
            .borrow()
            .nodes
            .iter()
            .filter_map(|(path, node)| match node {
                Node::File(content) => path
                    .strip_prefix(root)
                    .ok()
                    .map(|rel| (rel.to_path_buf(), content.clone())),
                Node::Dir | Node::Link(_) => None,
            })
            .collect()
    }

    fn check(&self, path: &Path) -> Result<()> {
        let tree = self.tree.borrow();
        if tree.denied.iter().any(|denied| path.starts_with(denied)) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission denied: {}", path.display()),
            )
            .into());
        }
        Ok(())
    }

    fn list(&self, root: &Path, wanted: fn(&Node) -> bool) -> Result<Vec<PathBuf>> {
        self.check(root)?;
        if !self.is_dir(root) {
            return Err(not_found(root));
        }
        Ok(self
            .tree
            .borrow()
            .nodes
            .iter()
            .filter(|(path, _)| path.as_path() != root && path.starts_with(root))
            .filter(|(_, node)| wanted(node))
            .map(|(path, _)| path.clone())
            .collect())
    }

    fn require_parent_dir(&self, path: &Path) -> Result<()> {
        match path.parent() {
            Some(parent) if self.is_dir(parent) => Ok(()),
            _ => Err(anyhow!(
                "Parent directory does not exist: {}",
                path.display()
            )),
        }
    }
}

fn not_found(path: &Path) -> anyhow::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such file or directory: {}", path.display()),
    )
    .into()
}

impl FileSystem for MemoryFs {
    fn list_dirs(&self, root: &Path) -> Result<Vec<PathBuf>> {
        self.list(root, |node| matches!(node, Node::Dir))
    }

    fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        self.list(root, |node| matches!(node, Node::File(_)))
    }

    fn list_special(&self, root: &Path) -> Result<Vec<PathBuf>> {
        self.list(root, |node| matches!(node, Node::Link(_)))
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.tree.borrow().nodes.get(path), Some(Node::Dir))
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(self.tree.borrow().nodes.get(path), Some(Node::File(_)))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + '_>> {
        self.check(path)?;
        let content = self.read(path).ok_or_else(|| not_found(path))?;
        Ok(Box::new(Cursor::new(content)))
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.check(path)?;
        if path.ancestors().any(|a| self.is_file(a) || self.is_link(a)) {
            return Err(anyhow!(
                "A file is in the way of directory: {}",
                path.display()
            ));
        }
        self.mkdir(path);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.check(from)?;
        self.check(to)?;
        if !self.exists(from) {
            return Err(not_found(from));
        }
        if self.exists(to) {
            return Err(anyhow!("Destination already exists: {}", to.display()));
        }
        self.require_parent_dir(to)?;

        let mut tree = self.tree.borrow_mut();
        let moved: Vec<PathBuf> = tree
            .nodes
            .keys()
            .filter(|path| path.starts_with(from))
            .cloned()
            .collect();
        for path in moved {
            if let Some(node) = tree.nodes.remove(&path) {
                let relative = path.strip_prefix(from)?;
                let target = if relative.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(relative)
                };
                tree.nodes.insert(target, node);
            }
        }
        Ok(())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        self.check(from)?;
        self.check(to)?;
        let content = self.read(from).ok_or_else(|| not_found(from))?;
        if to.ancestors().any(|a| self.is_link(a)) {
            return Err(anyhow!(
                "Refusing to write through symbolic link: {}",
                to.display()
            ));
        }
        if self.is_dir(to) {
            return Err(anyhow!("Destination is a directory: {}", to.display()));
        }
        self.require_parent_dir(to)?;
        self.tree
            .borrow_mut()
            .nodes
            .insert(to.to_path_buf(), Node::File(content));
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.check(path)?;
        if !self.is_file(path) && !self.is_link(path) {
            return Err(not_found(path));
        }
        self.tree.borrow_mut().nodes.remove(path);
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        self.check(path)?;
        if !self.is_dir(path) {
            return Err(not_found(path));
        }
        self.tree
            .borrow_mut()
            .nodes
            .retain(|candidate, _| !candidate.starts_with(path));
        Ok(())
    }

    fn is_empty_dir(&self, path: &Path) -> Result<bool> {
        if !self.is_dir(path) {
            return Err(not_found(path));
        }
        Ok(!self
            .tree
            .borrow()
            .nodes
            .keys()
            .any(|candidate| candidate.parent() == Some(path)))
    }
}
