//! The [CachedReader] turns names into loaded objects, sharing the results through an [ObjectPool].
//!
//! Reading a name goes through three steps:
//!
//! - Resolve it against the reader's [SearchPath] to a canonical absolute path, which (together with the
//!   post-processor's signature, if any) becomes the [CacheKey].
//! - Ask the pool for that key.  On a miss, exactly one thread runs the [Loader] and then the [PostProcessor].
//! - Hand back the shared object, or the error.
//!
//! A name which can't be resolved is an error which is never remembered, so fixing the search path fixes the read.
//! Load and post-processing failures are remembered by the pool and replayed until the name is cleared.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::RandomState;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::*;

pub struct CachedReader {
    resolver: SearchPathResolver,
    loader: Arc<dyn Loader>,
    post_processor: Option<Arc<dyn PostProcessor>>,
    /// Cached so that building keys doesn't allocate a new signature every time.
    post_process_signature: Option<Arc<str>>,
    pool: Arc<ObjectPool>,
    /// Keys this reader has put in the pool, so that [CachedReader::clear_all] only clears its own.
    keys: Mutex<KeySet>,
}

/// Keys are only forgotten by the pool when it evicts, so the set is pruned of them whenever it doubles.
const MIN_PRUNE_AT: usize = 64;

struct KeySet {
    keys: HashSet<CacheKey, RandomState>,
    /// Size at which to next drop keys the pool no longer has.
    prune_at: usize,
}

impl Default for KeySet {
    fn default() -> Self {
        KeySet {
            keys: Default::default(),
            prune_at: MIN_PRUNE_AT,
        }
    }
}

static DEFAULT_READER: Lazy<Arc<CachedReader>> = Lazy::new(|| {
    let search_path = search_path_from_env();
    debug!(paths = ?search_path.paths(), "Creating the default cached reader");
    let loader: Arc<dyn Loader> = LoaderRegistry::global();
    Arc::new(CachedReader::new(search_path, loader))
});

impl CachedReader {
    /// Build a reader backed by the default pool.
    pub fn new(search_path: SearchPath, loader: Arc<dyn Loader>) -> CachedReader {
        CachedReader {
            resolver: SearchPathResolver::new(search_path),
            loader,
            post_processor: None,
            post_process_signature: None,
            pool: ObjectPool::default_object_pool(),
            keys: Default::default(),
        }
    }

    /// Use `pool` instead of the default pool.
    pub fn with_pool(mut self, pool: Arc<ObjectPool>) -> CachedReader {
        self.pool = pool;
        *self.keys.get_mut() = Default::default();
        self
    }

    /// Run `post_processor` over everything this reader loads.
    pub fn with_post_processor(mut self, post_processor: Arc<dyn PostProcessor>) -> CachedReader {
        self.post_process_signature = Some(Arc::from(post_processor.signature()));
        self.post_processor = Some(post_processor);
        *self.keys.get_mut() = Default::default();
        self
    }

    /// The process-wide reader.
    ///
    /// It is created on first use, searching the directories named by [SEARCH_PATHS_VAR], loading through
    /// [LoaderRegistry::global], and backed by [ObjectPool::default_object_pool].
    pub fn default_cached_reader() -> Arc<CachedReader> {
        DEFAULT_READER.clone()
    }

    fn key_for_path(&self, path: PathBuf) -> CacheKey {
        CacheKey::with_post_process(path, self.post_process_signature.clone())
    }

    /// The key `name` maps to: its resolved path if there is one, otherwise the name itself.
    fn key_for_name(&self, name: &str) -> CacheKey {
        let path = self
            .resolver
            .resolve(name)
            .unwrap_or_else(|| PathBuf::from(name));
        self.key_for_path(path)
    }

    fn remember_key(&self, key: &CacheKey) {
        let mut set = self.keys.lock();
        if set.keys.contains(key) {
            return;
        }
        set.keys.insert(key.clone());

        if set.keys.len() >= set.prune_at {
            // Failed and pending keys still count as held, so clear_all can reach them.
            let pool = &self.pool;
            let before = set.keys.len();
            set.keys.retain(|k| pool.has_entry(k));
            set.prune_at = (set.keys.len() * 2).max(MIN_PRUNE_AT);
            trace!(before, after = set.keys.len(), "Pruned remembered keys");
        }
    }

    /// Load and post-process `path`.  Only ever run by the pool, once per key.
    fn load_and_post_process(&self, path: &Path) -> Result<Arc<dyn Object>, CacheError> {
        debug!(path = %path.display(), "Loading");
        let loaded = self.loader.load(path).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Load failed");
            CacheError::load_failed(path, e)
        })?;

        match &self.post_processor {
            Some(p) => p.apply(loaded).map_err(|e| {
                warn!(path = %path.display(), error = %e, "Post-processing failed");
                CacheError::post_process_failed(path, e)
            }),
            None => Ok(loaded),
        }
    }

    /// Read `name`, loading it if it isn't in the pool.
    pub fn read(&self, name: &str) -> Result<Arc<dyn Object>, CacheError> {
        let path = match self.resolver.resolve(name) {
            Some(p) => p,
            None => {
                // Something may have been inserted under the bare name.
                let key = self.key_for_path(PathBuf::from(name));
                return self
                    .pool
                    .get(&key)
                    .ok_or_else(|| CacheError::ResolutionFailed {
                        name: name.to_string(),
                    });
            }
        };

        let key = self.key_for_path(path);
        self.remember_key(&key);
        self.pool
            .get_or_compute(&key, || self.load_and_post_process(key.path()))
    }

    /// Put `object` in the pool under `name`, replacing anything there.
    ///
    /// This works even if `name` doesn't resolve, in which case the name itself is the key.
    pub fn insert(&self, name: &str, object: Arc<dyn Object>) {
        let key = self.key_for_name(name);
        self.remember_key(&key);
        self.pool.insert(key, object);
    }

    /// True if `name` currently has a loaded object in the pool.
    pub fn cached(&self, name: &str) -> bool {
        self.pool.contains(&self.key_for_name(name))
    }

    /// Forget whatever the pool holds for `name`, including a remembered failure.
    pub fn clear(&self, name: &str) {
        let key = self.key_for_name(name);
        self.keys.lock().keys.remove(&key);
        self.pool.clear(&key);
    }

    /// Forget everything this reader has put in the pool.  Entries put there by others are left alone.
    pub fn clear_all(&self) {
        let set = std::mem::take(&mut *self.keys.lock());
        for key in set.keys {
            self.pool.clear(&key);
        }
    }

    pub fn search_path(&self) -> SearchPath {
        self.resolver.search_path()
    }

    /// Change where names are looked up.
    ///
    /// Nothing already in the pool is invalidated: names simply resolve to different keys from now on.
    pub fn set_search_path(&self, search_path: SearchPath) {
        self.resolver.set_search_path(search_path);
    }

    pub fn object_pool(&self) -> &Arc<ObjectPool> {
        &self.pool
    }
}
