//! The capabilities the pool and the reader consume.
//!
//! Everything stored in an [ObjectPool] must be [MemoryAccountable], so that the pool can keep its total under budget.
//! The [CachedReader] additionally needs a [Loader] to turn a resolved path into an [Object], and optionally a
//! [PostProcessor] to transform what was loaded before it is cached.
use std::any::Any;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use crate::*;

/// Report the approximate in-memory footprint of a value, in bytes.
///
/// This doesn't need to be exact, but it should be stable: the pool records the cost once, when the value is
/// inserted, and subtracts the same number when the value leaves.
pub trait MemoryAccountable {
    fn memory_usage(&self) -> usize;
}

impl MemoryAccountable for String {
    fn memory_usage(&self) -> usize {
        self.capacity()
    }
}

impl MemoryAccountable for str {
    fn memory_usage(&self) -> usize {
        self.len()
    }
}

impl<T> MemoryAccountable for Vec<T> {
    fn memory_usage(&self) -> usize {
        self.capacity() * std::mem::size_of::<T>()
    }
}

impl<T: MemoryAccountable + ?Sized> MemoryAccountable for Box<T> {
    fn memory_usage(&self) -> usize {
        (**self).memory_usage()
    }
}

/// A loaded payload, as handed out by a [CachedReader].
///
/// This is implemented for anything which is [MemoryAccountable], thread-safe and `'static`; callers get their
/// concrete type back with `downcast_ref` or `downcast_arc`.
pub trait Object: MemoryAccountable + Any + Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: MemoryAccountable + Any + Debug + Send + Sync> Object for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl dyn Object {
    pub fn is<T: Any>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Convert a shared object into its concrete type, giving the original back if the type doesn't match.
    pub fn downcast_arc<T: Any + Send + Sync>(self: Arc<Self>) -> Result<Arc<T>, Arc<Self>> {
        if self.is::<T>() {
            match self.into_any().downcast::<T>() {
                Ok(x) => Ok(x),
                Err(_) => unreachable!("type was checked above"),
            }
        } else {
            Err(self)
        }
    }
}

/// A `Loader` knows how to read a file from disk into an [Object].
///
/// The reader calls this at most once per cache key; errors are remembered by the pool and not retried.
pub trait Loader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn Object>, BoxError>;
}

impl<F> Loader for F
where
    F: Fn(&Path) -> Result<Arc<dyn Object>, BoxError> + Send + Sync,
{
    fn load(&self, path: &Path) -> Result<Arc<dyn Object>, BoxError> {
        self(path)
    }
}

/// A transform run once over each freshly loaded object, before it is cached.
pub trait PostProcessor: Send + Sync {
    fn apply(&self, object: Arc<dyn Object>) -> Result<Arc<dyn Object>, BoxError>;

    /// Distinguishes this post-processor's results from those of others sharing the same pool.
    ///
    /// The default is the implementing type's name; override it when one type can be configured to do different
    /// things.
    fn signature(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

impl<F> PostProcessor for F
where
    F: Fn(Arc<dyn Object>) -> Result<Arc<dyn Object>, BoxError> + Send + Sync,
{
    fn apply(&self, object: Arc<dyn Object>) -> Result<Arc<dyn Object>, BoxError> {
        self(object)
    }
}
