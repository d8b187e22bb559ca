use std::path::{Component, Path, PathBuf};

/// How two paths are compared when deciding whether they name the same item.
///
/// The policy is explicit instead of following the host filesystem, so the
/// same source and replica trees produce the same diff on every platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathPolicy {
    /// `A.txt` and `a.txt` are different items.
    #[default]
    CaseSensitive,
    /// `A.txt` and `a.txt` are the same item.
    CaseInsensitive,
}

impl PathPolicy {
    pub fn from_case_insensitive(case_insensitive: bool) -> Self {
        if case_insensitive {
            PathPolicy::CaseInsensitive
        } else {
            PathPolicy::CaseSensitive
        }
    }

    pub fn is_case_insensitive(self) -> bool {
        self == PathPolicy::CaseInsensitive
    }

    /// Build the lookup key for a path relative to a tree root.
    ///
    /// Keys are only compared with other keys built by the same policy.
    pub fn key(self, relative: &Path) -> PathBuf {
        match self {
            PathPolicy::CaseSensitive => relative.to_path_buf(),
            PathPolicy::CaseInsensitive => relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
                .collect(),
        }
    }

    /// Whether `a` and `b` name the same location.
    pub fn same_path(self, a: &Path, b: &Path) -> bool {
        self.key(&normalize(a)) == self.key(&normalize(b))
    }

    /// Whether `inner` is `outer` itself or lies anywhere below it.
    ///
    /// Comparison is component-wise, so `/data/foo` is not inside `/data/fo`.
    pub fn is_within(self, outer: &Path, inner: &Path) -> bool {
        self.key(&normalize(inner))
            .starts_with(self.key(&normalize(outer)))
    }
}

/// Make a path absolute and fold `.` and `..` components without touching
/// the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
