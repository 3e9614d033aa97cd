//! A shared, memory-bounded cache of loaded objects, for programs which read the same large files from many threads.
//!
//! Loading a file and turning it into something usable, such as a mesh or an image, is expensive, and the results are
//! usually immutable and big.  This crate lets every part of a program share one copy of each, while keeping the total
//! under a memory budget.  It provides two types and some traits:
//!
//! [ObjectPool] maps keys to shared objects.  Each object reports its cost through [MemoryAccountable], and when the
//! total goes over budget the pool evicts approximately-least-recently-used objects until it is back under.  Its
//! [ObjectPool::get_or_compute] guarantees that concurrent misses on one key run the computation once, and remembers
//! failures so that a broken file is never loaded twice.  One pool may be shared by the whole process; see
//! [ObjectPool::default_object_pool].
//!
//! The higher level piece is [CachedReader], which resolves names against a [SearchPath], loads them with a [Loader],
//! optionally runs a [PostProcessor] over the result, and stores everything in a pool keyed by the resolved path:
//!
//! - A name which can't be found on the search path is an error which is not remembered.
//! - A file which fails to load or post-process is an error which is remembered, and replayed as
//!   [CacheError::CachedFailure] until the name is cleared.
//! - Changing the search path doesn't invalidate anything; names just resolve to different keys afterwards.
//!
//! To use this crate, implement [Loader] (or register loaders by extension in a [LoaderRegistry]), then construct a
//! [CachedReader], or use [CachedReader::default_cached_reader].
//!
//! Diagnostics are emitted with `tracing`; install a subscriber to see them.
mod cache_key;
mod cached_reader;
mod config;
mod error;
mod eviction;
mod loader_registry;
mod object_pool;
mod search_path;
mod traits;

pub use cache_key::*;
pub use cached_reader::*;
pub use config::*;
pub use error::*;
pub use eviction::*;
pub use loader_registry::*;
pub use object_pool::*;
pub use search_path::*;
pub use traits::*;
