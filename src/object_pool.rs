//! The [ObjectPool] is a process-wide, memory-bounded store of immutable shared objects.
//!
//! Entries live in a sharded hash map, so that lookups of unrelated keys don't contend on one lock.  Each entry is in
//! one of three states:
//!
//! - `Pending`: a thread is computing the value.  Other threads asking for the same key wait for it to finish rather
//!   than computing it again.
//! - `Ready`: the value is present and its cost counts towards the pool's memory usage.
//! - `Failed`: the computation failed.  The failure is remembered and replayed as [CacheError::CachedFailure] until
//!   the key is cleared or overwritten.
//!
//! Recency is tracked separately by an [EvictionPolicy] behind its own lock; whenever the pool goes over budget it asks
//! the policy for victims until it is back under, or only the entry that was just added is left.
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::{BuildHasher, Hash};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::*;

type Shard<K, V> = HashMap<K, Slot<V>, RandomState>;

#[derive(Clone, Debug, derive_builder::Builder)]
pub struct ObjectPoolConfig {
    /// Total cost, in bytes, of the ready entries before eviction kicks in.
    pub max_memory_usage: usize,
    /// Number of independently locked partitions of the key space.
    #[builder(default = "default_shard_count()")]
    pub shard_count: usize,
}

/// A few shards per core, rounded up to a power of two.
pub fn default_shard_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|x| x.get())
        .unwrap_or(4);
    (cores * 4).next_power_of_two().min(64)
}

struct ReadyEntry<V: ?Sized> {
    object: Arc<V>,
    cost: usize,
    id: u64,
    /// Shared with this entry's record in the eviction policy.
    referenced: Arc<AtomicBool>,
}

impl<V: ?Sized> ReadyEntry<V> {
    fn touch(&self) -> Arc<V> {
        self.referenced.store(true, Ordering::Relaxed);
        self.object.clone()
    }
}

/// Where threads which lose the race to compute a key wait for the winner.
struct PendingCompute<V: ?Sized> {
    outcome: Mutex<Option<Result<Arc<V>, CacheError>>>,
    done: Condvar,
}

impl<V: ?Sized> PendingCompute<V> {
    fn new() -> PendingCompute<V> {
        PendingCompute {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn complete(&self, outcome: Result<Arc<V>, CacheError>) {
        *self.outcome.lock() = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self) -> Result<Arc<V>, CacheError> {
        let mut guard = self.outcome.lock();
        loop {
            if let Some(x) = guard.as_ref() {
                return x.clone();
            }
            self.done.wait(&mut guard);
        }
    }
}

enum Slot<V: ?Sized> {
    Pending(Arc<PendingCompute<V>>),
    Ready(ReadyEntry<V>),
    /// Summary of the error the computation produced.
    Failed(Arc<str>),
}

pub struct ObjectPool<K = CacheKey, V: ?Sized = dyn Object> {
    shards: Box<[Mutex<Shard<K, V>>]>,
    shard_hasher: RandomState,
    policy: Mutex<EvictionPolicy<K>>,
    memory_usage: AtomicUsize,
    max_memory_usage: AtomicUsize,
    next_id: AtomicU64,
}

static DEFAULT_POOL: Lazy<Arc<ObjectPool>> = Lazy::new(|| {
    let config = pool_config_from_env();
    debug!(
        max_memory_usage = config.max_memory_usage,
        "Creating the default object pool"
    );
    Arc::new(ObjectPool::with_config(config))
});

impl ObjectPool {
    /// The pool shared by every [CachedReader] which wasn't given one explicitly.
    ///
    /// Its budget comes from the environment the first time it is used; see [pool_config_from_env].
    pub fn default_object_pool() -> Arc<ObjectPool> {
        DEFAULT_POOL.clone()
    }
}

impl<K, V> ObjectPool<K, V>
where
    K: Hash + Eq + Clone + Display,
    V: MemoryAccountable + Send + Sync + ?Sized,
{
    pub fn new(max_memory_usage: usize) -> ObjectPool<K, V> {
        ObjectPool::with_config(ObjectPoolConfig {
            max_memory_usage,
            shard_count: default_shard_count(),
        })
    }

    pub fn with_config(config: ObjectPoolConfig) -> ObjectPool<K, V> {
        let shards = (0..config.shard_count.max(1))
            .map(|_| Mutex::new(Default::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        ObjectPool {
            shards,
            shard_hasher: Default::default(),
            policy: Mutex::new(EvictionPolicy::new()),
            memory_usage: AtomicUsize::new(0),
            max_memory_usage: AtomicUsize::new(config.max_memory_usage),
            next_id: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &K) -> &Mutex<Shard<K, V>> {
        let hash = self.shard_hasher.hash_one(key);
        &self.shards[(hash % self.shards.len() as u64) as usize]
    }

    /// Get the object for `key`, running `compute` to produce it if the pool doesn't have it.
    ///
    /// At most one thread runs `compute` for a key; any others arriving meanwhile block until it finishes and then
    /// share its outcome.  Only the shard holding `key` is locked, and only briefly: `compute` itself runs without any
    /// pool lock held.
    ///
    /// A failed computation, including one that panicked, is remembered.  Later calls get
    /// [CacheError::CachedFailure] without `compute` being run, until the key is cleared.
    pub fn get_or_compute<F>(&self, key: &K, compute: F) -> Result<Arc<V>, CacheError>
    where
        F: FnOnce() -> Result<Arc<V>, CacheError>,
    {
        let pending = {
            let mut shard = self.shard(key).lock();
            match shard.get(key) {
                Some(Slot::Ready(entry)) => {
                    trace!(%key, "Pool hit");
                    return Ok(entry.touch());
                }
                Some(Slot::Failed(summary)) => {
                    return Err(CacheError::CachedFailure {
                        key: key.to_string(),
                        summary: summary.to_string(),
                    });
                }
                Some(Slot::Pending(p)) => {
                    let p = p.clone();
                    drop(shard);
                    trace!(%key, "Waiting for another thread to compute");
                    return p.wait();
                }
                None => {
                    let p = Arc::new(PendingCompute::new());
                    shard.insert(key.clone(), Slot::Pending(p.clone()));
                    p
                }
            }
        };

        // The cost is user code too, so it is measured under the same guard, before any lock is taken.
        let costed = panic::catch_unwind(AssertUnwindSafe(|| {
            compute().map(|object| {
                let cost = object.memory_usage();
                (object, cost)
            })
        }));
        let costed = match costed {
            Ok(x) => x,
            Err(payload) => Err(CacheError::Panicked {
                message: panic_message(payload.as_ref()),
            }),
        };

        self.publish(key, &pending, &costed);
        let outcome = costed.map(|(object, _)| object);
        pending.complete(outcome.clone());
        outcome
    }

    /// Move `key` out of `Pending`, provided it is still the claim this thread made.
    ///
    /// If the key was cleared or overwritten while we were computing, the newer state wins and the outcome only goes
    /// to this call's waiters.
    fn publish(
        &self,
        key: &K,
        pending: &Arc<PendingCompute<V>>,
        outcome: &Result<(Arc<V>, usize), CacheError>,
    ) {
        let mut protect = None;
        {
            let mut shard = self.shard(key).lock();
            let still_ours =
                matches!(shard.get(key), Some(Slot::Pending(p)) if Arc::ptr_eq(p, pending));
            if !still_ours {
                debug!(%key, "Entry changed while computing; discarding the result");
                return;
            }

            let slot = match outcome {
                Ok((object, cost)) => {
                    let entry = self.track(key, object.clone(), *cost);
                    protect = Some(entry.id);
                    Slot::Ready(entry)
                }
                Err(e) => Slot::Failed(Arc::from(e.to_string())),
            };
            shard.insert(key.clone(), slot);
        }

        if protect.is_some() {
            self.enforce_limit(protect);
        }
    }

    /// Build a ready entry and account for it.  Must be called with the key's shard locked, and the entry must then
    /// be placed in the shard.
    fn track(&self, key: &K, object: Arc<V>, cost: usize) -> ReadyEntry<V> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let referenced = Arc::new(AtomicBool::new(false));
        self.policy
            .lock()
            .record(key.clone(), id, cost, referenced.clone());
        self.memory_usage.fetch_add(cost, Ordering::AcqRel);
        ReadyEntry {
            object,
            cost,
            id,
            referenced,
        }
    }

    /// Undo [Self::track] for an entry which was just taken out of its shard.
    fn untrack(&self, entry: &ReadyEntry<V>) {
        self.policy.lock().forget(entry.id);
        self.memory_usage.fetch_sub(entry.cost, Ordering::AcqRel);
    }

    /// Put an object in the pool, replacing whatever state `key` was in.
    ///
    /// Overwriting a pending key doesn't interrupt the computation; its result goes to the threads waiting on it, but
    /// the pool keeps this object.
    pub fn insert(&self, key: K, object: Arc<V>) {
        let cost = object.memory_usage();
        let id = {
            let mut shard = self.shard(&key).lock();
            let entry = self.track(&key, object, cost);
            let id = entry.id;
            if let Some(Slot::Ready(old)) = shard.insert(key, Slot::Ready(entry)) {
                self.untrack(&old);
            }
            id
        };
        self.enforce_limit(Some(id));
    }

    /// Get the object for `key` if it is ready, without computing anything.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        match self.shard(key).lock().get(key) {
            Some(Slot::Ready(entry)) => Some(entry.touch()),
            _ => None,
        }
    }

    /// True only if `key` has a ready object.  Pending and failed keys aren't contained.
    pub fn contains(&self, key: &K) -> bool {
        matches!(self.shard(key).lock().get(key), Some(Slot::Ready(_)))
    }

    /// True if `key` is known to the pool in any state, including pending and failed.
    pub fn has_entry(&self, key: &K) -> bool {
        self.shard(key).lock().contains_key(key)
    }

    /// Forget `key`, whatever state it is in.  Does nothing if the pool doesn't know the key.
    pub fn clear(&self, key: &K) {
        let removed = self.shard(key).lock().remove(key);
        if let Some(Slot::Ready(entry)) = removed {
            // Lock order is shard then policy everywhere else, but the shard is released by now, so there's nothing
            // to deadlock against.
            self.untrack(&entry);
        }
    }

    /// Forget every key.
    pub fn clear_all(&self) {
        for shard in self.shards.iter() {
            let drained = std::mem::take(&mut *shard.lock());
            for (_, slot) in drained {
                if let Slot::Ready(entry) = slot {
                    self.untrack(&entry);
                }
            }
        }
    }

    /// Total cost of every ready object.
    pub fn memory_usage(&self) -> usize {
        self.memory_usage.load(Ordering::Acquire)
    }

    pub fn max_memory_usage(&self) -> usize {
        self.max_memory_usage.load(Ordering::Acquire)
    }

    /// Change the budget.  Lowering it evicts before returning, down to the new budget or until the pool is empty.
    pub fn set_max_memory_usage(&self, max_memory_usage: usize) {
        self.max_memory_usage
            .store(max_memory_usage, Ordering::Release);
        self.enforce_limit(None);
    }

    /// Number of keys in any state.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|x| x.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|x| x.lock().is_empty())
    }

    /// Evict until the pool is back under budget, never evicting the entry `protect`.
    fn enforce_limit(&self, protect: Option<u64>) {
        while self.memory_usage() > self.max_memory_usage() {
            let victim = match self.policy.lock().select_victim(protect) {
                Some(v) => v,
                None => break,
            };

            let mut shard = self.shard(&victim.key).lock();
            let matches = matches!(shard.get(&victim.key), Some(Slot::Ready(e)) if e.id == victim.id);
            if matches {
                shard.remove(&victim.key);
                self.memory_usage
                    .fetch_sub(victim.cost, Ordering::AcqRel);
                debug!(key = %victim.key, cost = victim.cost, "Evicted");
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::time::{Duration, Instant};

    use super::*;

    /// A payload with a fixed cost.
    #[derive(Debug, PartialEq)]
    struct Blob(usize);

    impl MemoryAccountable for Blob {
        fn memory_usage(&self) -> usize {
            self.0
        }
    }

    fn build_pool(max: usize) -> ObjectPool<String, Blob> {
        let cfg = ObjectPoolConfigBuilder::default()
            .max_memory_usage(max)
            .shard_count(4)
            .build()
            .expect("Should build");
        ObjectPool::with_config(cfg)
    }

    fn compute_blob(cost: usize) -> impl FnOnce() -> Result<Arc<Blob>, CacheError> {
        move || Ok(Arc::new(Blob(cost)))
    }

    #[test]
    fn basic_ops() {
        let pool = build_pool(1000);
        let a = pool.get_or_compute(&"a".to_string(), compute_blob(10)).unwrap();
        let a2 = pool
            .get_or_compute(&"a".to_string(), || panic!("Should not recompute"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &a2));
        assert!(pool.contains(&"a".to_string()));
        assert_eq!(pool.memory_usage(), 10);

        pool.insert("b".to_string(), Arc::new(Blob(20)));
        assert_eq!(pool.memory_usage(), 30);
        assert_eq!(pool.len(), 2);

        pool.clear(&"a".to_string());
        assert!(!pool.contains(&"a".to_string()));
        assert_eq!(pool.memory_usage(), 20);

        // Clearing something unknown is fine.
        pool.clear(&"nope".to_string());

        pool.clear_all();
        assert_eq!(pool.memory_usage(), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_memory_accounting_and_shrinking() {
        let pool = build_pool(1 << 20);
        pool.insert("a".to_string(), Arc::new(Blob(300)));
        pool.insert("b".to_string(), Arc::new(Blob(500)));
        assert_eq!(pool.memory_usage(), 800);

        pool.set_max_memory_usage(799);
        assert_eq!(pool.max_memory_usage(), 799);
        assert!(pool.memory_usage() < 800);
        assert!(!(pool.contains(&"a".to_string()) && pool.contains(&"b".to_string())));

        // Nothing fits any more, so everything goes.
        pool.set_max_memory_usage(pool.memory_usage() / 2);
        assert_eq!(pool.memory_usage(), 0);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_newest_entry_crowds_out_older() {
        let pool = build_pool(1000);
        pool.get_or_compute(&"a".to_string(), compute_blob(600)).unwrap();
        pool.get_or_compute(&"b".to_string(), compute_blob(600)).unwrap();

        assert!(pool.memory_usage() <= 1000);
        assert!(!pool.contains(&"a".to_string()));
        assert!(pool.contains(&"b".to_string()));
    }

    #[test]
    fn test_oversized_entry_is_kept() {
        let pool = build_pool(100);
        pool.insert("small".to_string(), Arc::new(Blob(10)));
        pool.insert("huge".to_string(), Arc::new(Blob(1000)));

        assert!(pool.contains(&"huge".to_string()));
        assert!(!pool.contains(&"small".to_string()));
        assert_eq!(pool.memory_usage(), 1000);

        // And it is crowded out by the next insert.
        pool.insert("next".to_string(), Arc::new(Blob(10)));
        assert!(!pool.contains(&"huge".to_string()));
        assert_eq!(pool.memory_usage(), 10);
    }

    #[test]
    fn test_recently_used_entries_survive() {
        let pool = build_pool(30);
        for k in &["a", "b", "c"] {
            pool.insert(k.to_string(), Arc::new(Blob(10)));
        }
        pool.get(&"a".to_string()).unwrap();
        pool.insert("d".to_string(), Arc::new(Blob(10)));

        assert!(pool.contains(&"a".to_string()));
        assert!(!pool.contains(&"b".to_string()));
        assert!(pool.contains(&"c".to_string()));
        assert!(pool.contains(&"d".to_string()));
    }

    #[test]
    fn test_insert_overwrites() {
        let pool = build_pool(1000);
        let key = "k".to_string();
        pool.insert(key.clone(), Arc::new(Blob(10)));
        pool.insert(key.clone(), Arc::new(Blob(25)));
        assert_eq!(pool.memory_usage(), 25);
        assert_eq!(*pool.get(&key).unwrap(), Blob(25));

        // Insert also replaces a remembered failure.
        let bad = "bad".to_string();
        pool.get_or_compute(&bad, || Err(CacheError::compute_failed("nope")))
            .unwrap_err();
        assert!(!pool.contains(&bad));
        pool.insert(bad.clone(), Arc::new(Blob(5)));
        assert_eq!(*pool.get_or_compute(&bad, || panic!("Ready")).unwrap(), Blob(5));
    }

    #[test]
    fn test_failures_are_sticky() {
        let pool = build_pool(1000);
        let key = "k".to_string();
        let first = pool
            .get_or_compute(&key, || Err(CacheError::compute_failed("disk on fire")))
            .unwrap_err();
        let second = pool
            .get_or_compute(&key, || panic!("Should not retry"))
            .unwrap_err();

        assert!(!first.is_cached_failure());
        assert!(second.is_cached_failure());
        assert_ne!(first.to_string(), second.to_string());
        assert!(second.to_string().contains("disk on fire"));
        assert!(!pool.contains(&key));
        assert_eq!(pool.memory_usage(), 0);

        // Clearing allows another attempt.
        pool.clear(&key);
        assert_eq!(*pool.get_or_compute(&key, compute_blob(3)).unwrap(), Blob(3));
    }

    #[test]
    fn test_panics_become_failures() {
        let pool = build_pool(1000);
        let key = "k".to_string();
        let first = pool
            .get_or_compute(&key, || panic!("boom"))
            .unwrap_err();
        match first {
            CacheError::Panicked { ref message } => assert_eq!(message, "boom"),
            ref e => panic!("Unexpected error {:?}", e),
        }
        assert!(pool
            .get_or_compute(&key, compute_blob(1))
            .unwrap_err()
            .is_cached_failure());
    }

    #[test]
    fn test_at_most_one_computation() {
        const THREADS: usize = 16;
        let pool = Arc::new(build_pool(1000));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles = (0..THREADS)
            .map(|_| {
                let pool = pool.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    pool.get_or_compute(&"shared".to_string(), || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(50));
                        Ok(Arc::new(Blob(7)))
                    })
                    .unwrap()
                })
            })
            .collect::<Vec<_>>();
        let results = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|x| Arc::ptr_eq(x, &results[0])));
        assert_eq!(pool.memory_usage(), 7);
    }

    #[test]
    fn test_waiters_share_the_failure() {
        let pool = Arc::new(build_pool(1000));
        let started = Arc::new(Barrier::new(2));

        let computing = {
            let pool = pool.clone();
            let started = started.clone();
            std::thread::spawn(move || {
                pool.get_or_compute(&"k".to_string(), || {
                    started.wait();
                    std::thread::sleep(Duration::from_millis(50));
                    Err(CacheError::compute_failed("bad data"))
                })
            })
        };

        started.wait();
        let waited = pool
            .get_or_compute(&"k".to_string(), || panic!("Should wait instead"))
            .unwrap_err();
        let computed = computing.join().unwrap().unwrap_err();
        assert_eq!(waited.to_string(), computed.to_string());
    }

    #[test]
    fn test_slow_compute_does_not_block_other_keys() {
        let pool = Arc::new(build_pool(1000));
        let started = Arc::new(Barrier::new(2));

        let slow = {
            let pool = pool.clone();
            let started = started.clone();
            std::thread::spawn(move || {
                pool.get_or_compute(&"slow".to_string(), || {
                    started.wait();
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(Arc::new(Blob(1)))
                })
                .unwrap();
            })
        };

        started.wait();
        let begin = Instant::now();
        pool.get_or_compute(&"fast".to_string(), compute_blob(1))
            .unwrap();
        assert!(!pool.contains(&"slow".to_string()));
        assert!(begin.elapsed() < Duration::from_millis(300));
        slow.join().unwrap();
        assert!(pool.contains(&"slow".to_string()));
    }

    #[test]
    fn test_clear_while_computing() {
        let pool = Arc::new(build_pool(1000));
        let started = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let computing = {
            let pool = pool.clone();
            let started = started.clone();
            let release = release.clone();
            std::thread::spawn(move || {
                pool.get_or_compute(&"k".to_string(), || {
                    started.wait();
                    release.wait();
                    Ok(Arc::new(Blob(4)))
                })
            })
        };

        started.wait();
        pool.clear(&"k".to_string());
        release.wait();

        // The computing thread still gets its object, but the clear wins.
        assert_eq!(*computing.join().unwrap().unwrap(), Blob(4));
        assert!(!pool.contains(&"k".to_string()));
        assert_eq!(pool.memory_usage(), 0);
    }

    #[test]
    fn test_insert_while_computing() {
        let pool = Arc::new(build_pool(1000));
        let key = "k".to_string();
        let started = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let computing = {
            let pool = pool.clone();
            let key = key.clone();
            let started = started.clone();
            let release = release.clone();
            std::thread::spawn(move || {
                pool.get_or_compute(&key, || {
                    started.wait();
                    release.wait();
                    Ok(Arc::new(Blob(4)))
                })
            })
        };

        started.wait();
        pool.insert(key.clone(), Arc::new(Blob(9)));
        release.wait();

        // The computing thread gets what it computed; the pool keeps what was inserted.
        assert_eq!(*computing.join().unwrap().unwrap(), Blob(4));
        assert_eq!(pool.get(&key).as_deref(), Some(&Blob(9)));
        assert_eq!(pool.memory_usage(), 9);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_panicking_cost_becomes_a_failure() {
        #[derive(Debug)]
        struct Unmeasurable;

        impl MemoryAccountable for Unmeasurable {
            fn memory_usage(&self) -> usize {
                panic!("can't measure this")
            }
        }

        let pool = ObjectPool::<String, Unmeasurable>::new(1000);
        let key = "k".to_string();
        let first = pool
            .get_or_compute(&key, || Ok(Arc::new(Unmeasurable)))
            .unwrap_err();
        match first {
            CacheError::Panicked { ref message } => assert_eq!(message, "can't measure this"),
            ref e => panic!("Unexpected error {:?}", e),
        }

        // The key isn't left pending, so later callers get the failure instead of blocking.
        assert!(pool
            .get_or_compute(&key, || panic!("Should not retry"))
            .unwrap_err()
            .is_cached_failure());
        assert!(!pool.contains(&key));
        assert_eq!(pool.memory_usage(), 0);
    }

    #[test]
    fn test_concurrent_clear_storm() {
        let pool = Arc::new(build_pool(100));
        let stop = Instant::now() + Duration::from_millis(300);

        let mut handles = vec![];
        for t in 0..4 {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                let mut i = t;
                while Instant::now() < stop {
                    let key = format!("{}", i % 8);
                    pool.get_or_compute(&key, compute_blob(10 + i % 8))
                        .expect("No failure should ever be recorded");
                    i += 1;
                }
            }));
        }
        {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                let mut i = 0;
                while Instant::now() < stop {
                    if i % 2 == 0 {
                        pool.clear_all();
                    } else {
                        pool.clear(&format!("{}", i % 8));
                    }
                    i += 1;
                }
            }));
        }
        {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                let mut i = 0;
                while Instant::now() < stop {
                    pool.set_max_memory_usage(if i % 2 == 0 { 30 } else { 100 });
                    i += 1;
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        pool.set_max_memory_usage(100);
        assert!(pool.memory_usage() <= 100);
        pool.clear_all();
        assert_eq!(pool.memory_usage(), 0);
        assert!(pool.policy.lock().is_empty());
    }
}
