use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::debug;

/// An ordered list of directories to look for files in.
///
/// Two search paths are equal when they list the same directories in the same order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SearchPath {
    paths: Vec<PathBuf>,
}

fn conv_path(name: &str) -> Option<relative_path::RelativePathBuf> {
    relative_path::RelativePathBuf::from_path(name).ok()
}

impl SearchPath {
    pub fn new<I, P>(paths: I) -> SearchPath
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        SearchPath {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Split `text` on `separator`, as in `PATH`-style environment variables.  Empty components are skipped.
    pub fn from_delimited(text: &str, separator: char) -> SearchPath {
        SearchPath::new(text.split(separator).filter(|x| !x.is_empty()))
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Find the first file called `name` in any of the directories, returning its canonical absolute path.
    ///
    /// Absolute names are checked as they are, without consulting the directories.  Relative names are joined
    /// logically, so `..` segments are resolved against the directory rather than the filesystem.
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() {
            return None;
        }

        let as_path = Path::new(name);
        if as_path.is_absolute() {
            return existing_file(as_path);
        }

        // On Windows, canonicalize is currently very broken when relative path segments appear in the middle of a
        // path. Go via `RelativePathBuf` to clean it up first.
        let relative = conv_path(name)?;
        self.paths
            .iter()
            .find_map(|dir| existing_file(&relative.to_logical_path(dir)))
    }
}

fn existing_file(candidate: &Path) -> Option<PathBuf> {
    if !candidate.is_file() {
        return None;
    }
    std::fs::canonicalize(candidate).ok()
}

/// A [SearchPath] which can be swapped out while other threads are resolving names against it.
#[derive(Debug, Default)]
pub struct SearchPathResolver {
    search_path: RwLock<SearchPath>,
}

impl SearchPathResolver {
    pub fn new(search_path: SearchPath) -> SearchPathResolver {
        SearchPathResolver {
            search_path: RwLock::new(search_path),
        }
    }

    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        self.search_path.read().find(name)
    }

    pub fn search_path(&self) -> SearchPath {
        self.search_path.read().clone()
    }

    /// Replace the search path, returning whether anything changed.  Setting an equal search path is a no-op.
    pub fn set_search_path(&self, search_path: SearchPath) -> bool {
        let mut guard = self.search_path.write();
        if *guard == search_path {
            return false;
        }
        debug!(paths = ?search_path.paths(), "Search path changed");
        *guard = search_path;
        true
    }
}
