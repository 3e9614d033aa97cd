use std::error::Error as StdError;
use std::path::PathBuf;
use std::sync::Arc;

/// The error type loaders and post-processors hand back.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Everything that can go wrong getting an object out of the cache.
///
/// Errors are cheap to clone so that one failed computation can be reported to every thread that waited on it.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CacheError {
    /// The name wasn't found in any directory of the search path. This is never cached.
    #[error("unable to find \"{name}\" on the search path")]
    ResolutionFailed { name: String },

    #[error("failed to load {}: {source}", path.display())]
    LoadFailed {
        path: PathBuf,
        #[source]
        source: SharedError,
    },

    #[error("failed to post-process {}: {source}", path.display())]
    PostProcessFailed {
        path: PathBuf,
        #[source]
        source: SharedError,
    },

    /// A computation passed directly to [crate::ObjectPool::get_or_compute] failed.
    #[error("computation failed: {source}")]
    ComputeFailed {
        #[source]
        source: SharedError,
    },

    #[error("computation panicked: {message}")]
    Panicked { message: String },

    /// Replay of an earlier failure for the same key; the computation was not attempted again.
    #[error("previous attempt to get \"{key}\" failed: {summary}")]
    CachedFailure { key: String, summary: String },
}

impl CacheError {
    pub fn load_failed(path: impl Into<PathBuf>, source: BoxError) -> CacheError {
        CacheError::LoadFailed {
            path: path.into(),
            source: Arc::from(source),
        }
    }

    pub fn post_process_failed(path: impl Into<PathBuf>, source: BoxError) -> CacheError {
        CacheError::PostProcessFailed {
            path: path.into(),
            source: Arc::from(source),
        }
    }

    pub fn compute_failed(source: impl Into<BoxError>) -> CacheError {
        CacheError::ComputeFailed {
            source: Arc::from(source.into()),
        }
    }

    /// True for errors which came out of the cache rather than a fresh attempt.
    pub fn is_cached_failure(&self) -> bool {
        matches!(self, CacheError::CachedFailure { .. })
    }
}
