//! A [LoaderRegistry] picks a [Loader] by file extension, so that one reader can serve several formats.
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use ahash::RandomState;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::*;

#[derive(Debug, thiserror::Error)]
#[error("no loader is registered for {}", path.display())]
pub struct NoLoaderError {
    path: std::path::PathBuf,
}

#[derive(Default)]
pub struct LoaderRegistry {
    loaders: RwLock<HashMap<String, Arc<dyn Loader>, RandomState>>,
}

static GLOBAL_REGISTRY: Lazy<Arc<LoaderRegistry>> = Lazy::new(Default::default);

fn normalize_extension(extension: &str) -> String {
    extension.trim_start_matches('.').to_ascii_lowercase()
}

impl LoaderRegistry {
    pub fn new() -> LoaderRegistry {
        Default::default()
    }

    /// The registry used by [CachedReader::default_cached_reader].
    pub fn global() -> Arc<LoaderRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    /// Register `loader` for files ending in `extension`, replacing any previous registration.
    ///
    /// Extensions are matched case-insensitively, with or without the leading dot.
    pub fn register(&self, extension: &str, loader: Arc<dyn Loader>) -> Option<Arc<dyn Loader>> {
        self.loaders
            .write()
            .insert(normalize_extension(extension), loader)
    }

    pub fn unregister(&self, extension: &str) -> Option<Arc<dyn Loader>> {
        self.loaders.write().remove(&normalize_extension(extension))
    }

    pub fn loader_for(&self, path: &Path) -> Option<Arc<dyn Loader>> {
        let ext = path.extension()?.to_str()?;
        self.loaders.read().get(&normalize_extension(ext)).cloned()
    }
}

impl Loader for LoaderRegistry {
    fn load(&self, path: &Path) -> Result<Arc<dyn Object>, BoxError> {
        // Don't hold the registry lock while loading.
        let loader = self.loader_for(path).ok_or_else(|| NoLoaderError {
            path: path.to_path_buf(),
        })?;
        loader.load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_loader(prefix: &'static str) -> Arc<dyn Loader> {
        Arc::new(move |path: &Path| -> Result<Arc<dyn Object>, BoxError> {
            let contents = std::fs::read_to_string(path)?;
            Ok(Arc::new(format!("{}{}", prefix, contents)))
        })
    }

    #[test]
    fn test_dispatch_by_extension() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let txt = tmp_dir.path().join("a.TXT");
        let dat = tmp_dir.path().join("b.dat");
        let other = tmp_dir.path().join("c.bin");
        for p in &[&txt, &dat, &other] {
            std::fs::write(p, "x").unwrap();
        }

        let registry = LoaderRegistry::new();
        registry.register("txt", string_loader("text:"));
        registry.register(".dat", string_loader("data:"));

        let loaded = registry.load(&txt).unwrap();
        assert_eq!(loaded.downcast_ref::<String>().unwrap(), "text:x");
        let loaded = registry.load(&dat).unwrap();
        assert_eq!(loaded.downcast_ref::<String>().unwrap(), "data:x");

        let err = registry.load(&other).unwrap_err();
        assert!(err.to_string().contains("no loader is registered"));

        assert!(registry.unregister("DAT").is_some());
        assert!(registry.load(&dat).is_err());
    }
}
