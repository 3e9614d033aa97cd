use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identifies one entry of an [crate::ObjectPool] filled by a [crate::CachedReader].
///
/// Usually this is the absolute path a name resolved to; if the reader post-processes what it loads, the
/// post-processor's signature is part of the key as well, so that differently-processed versions of one file don't
/// collide in a shared pool.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct CacheKey {
    path: PathBuf,
    post_process: Option<Arc<str>>,
}

impl CacheKey {
    pub fn new(path: impl Into<PathBuf>) -> CacheKey {
        CacheKey {
            path: path.into(),
            post_process: None,
        }
    }

    pub fn with_post_process(path: impl Into<PathBuf>, signature: Option<Arc<str>>) -> CacheKey {
        CacheKey {
            path: path.into(),
            post_process: signature,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn post_process(&self) -> Option<&str> {
        self.post_process.as_deref()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.post_process {
            Some(sig) => write!(f, "{} [{}]", self.path.display(), sig),
            None => write!(f, "{}", self.path.display()),
        }
    }
}
