//! Process-wide configuration for the default pool and reader, read from the environment.
use tracing::warn;

use crate::*;

/// `:`-separated list of directories searched by [CachedReader::default_cached_reader].
pub const SEARCH_PATHS_VAR: &str = "CACHED_READER_PATHS";

/// Budget of [ObjectPool::default_object_pool], in megabytes.
pub const POOL_MEMORY_VAR: &str = "OBJECT_POOL_MEMORY";

pub const DEFAULT_POOL_MEMORY_MB: usize = 500;

pub fn search_path_from_env() -> SearchPath {
    match std::env::var(SEARCH_PATHS_VAR) {
        Ok(x) => SearchPath::from_delimited(&x, ':'),
        Err(_) => SearchPath::default(),
    }
}

fn parse_megabytes(value: Option<&str>) -> usize {
    let megabytes = match value {
        None => DEFAULT_POOL_MEMORY_MB,
        Some(text) => match text.trim().parse::<usize>() {
            Ok(x) => x,
            Err(e) => {
                warn!(
                    value = text,
                    error = %e,
                    "Invalid {}, using {} megabytes",
                    POOL_MEMORY_VAR,
                    DEFAULT_POOL_MEMORY_MB
                );
                DEFAULT_POOL_MEMORY_MB
            }
        },
    };
    megabytes.saturating_mul(1024 * 1024)
}

pub fn pool_config_from_env() -> ObjectPoolConfig {
    let value = std::env::var(POOL_MEMORY_VAR).ok();
    ObjectPoolConfig {
        max_memory_usage: parse_megabytes(value.as_deref()),
        shard_count: default_shard_count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_megabytes() {
        assert_eq!(parse_megabytes(None), 500 * 1024 * 1024);
        assert_eq!(parse_megabytes(Some(" 2 ")), 2 * 1024 * 1024);
        assert_eq!(parse_megabytes(Some("lots")), 500 * 1024 * 1024);
    }

    #[test]
    fn test_search_path_from_env() {
        std::env::set_var(SEARCH_PATHS_VAR, "a:test:path");
        assert_eq!(
            search_path_from_env(),
            SearchPath::from_delimited("a:test:path", ':')
        );
        assert_eq!(search_path_from_env(), SearchPath::new(vec!["a", "test", "path"]));

        std::env::remove_var(SEARCH_PATHS_VAR);
        assert_eq!(search_path_from_env(), SearchPath::default());
    }
}
