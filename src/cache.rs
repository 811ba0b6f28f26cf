//! Decoded-value cache.
//!
//! Many addresses resolve to the same data-section offset, so decoded values
//! are cached by that offset rather than by address. Entries are always
//! fully pointer-resolved, which keeps cache hits free of any further
//! decoding. The source file is immutable for the life of a handle, so
//! entries are never invalidated, only evicted by the bounded policy.
//!
//! Racing `put` calls for one offset are last-write-wins; decoding is
//! deterministic, so both writers insert identical values and the race is a
//! performance concern, not a correctness one.

use crate::decoder::DataValue;
use lru::LruCache;
use rustc_hash::FxBuildHasher;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Default capacity for the bounded cache, matching the conventional
/// decoded-node cache size for this format.
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Cache strategy selected at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// No caching; every lookup decodes. Baseline for correctness testing
    /// and for workloads with no locality.
    None,
    /// Bounded concurrent cache with LRU eviction.
    Bounded(usize),
}

impl Default for CacheStrategy {
    fn default() -> Self {
        CacheStrategy::Bounded(DEFAULT_CACHE_CAPACITY)
    }
}

/// Cache over decoded values, keyed by data-section offset.
pub enum DataCache {
    /// `get` always misses, `put` is a no-op
    Disabled,
    /// Fixed-capacity LRU behind a mutex
    Lru(Mutex<LruCache<u32, Arc<DataValue>, FxBuildHasher>>),
}

impl DataCache {
    /// Build the cache for a strategy. A bounded capacity of zero disables
    /// caching.
    pub fn new(strategy: CacheStrategy) -> Self {
        match strategy {
            CacheStrategy::None => DataCache::Disabled,
            CacheStrategy::Bounded(capacity) => match NonZeroUsize::new(capacity) {
                Some(cap) => DataCache::Lru(Mutex::new(LruCache::with_hasher(
                    cap,
                    FxBuildHasher,
                ))),
                None => DataCache::Disabled,
            },
        }
    }

    /// Fetch a previously decoded value, promoting its recency.
    pub fn get(&self, offset: u32) -> Option<Arc<DataValue>> {
        match self {
            DataCache::Disabled => None,
            DataCache::Lru(cache) => {
                let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
                cache.get(&offset).cloned()
            }
        }
    }

    /// Store a fully resolved value, evicting the least recently used entry
    /// once at capacity.
    pub fn put(&self, offset: u32, value: Arc<DataValue>) {
        match self {
            DataCache::Disabled => {}
            DataCache::Lru(cache) => {
                let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
                cache.put(offset, value);
            }
        }
    }
}

impl std::fmt::Debug for DataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataCache::Disabled => write!(f, "DataCache::Disabled"),
            DataCache::Lru(cache) => {
                let cache = cache.lock().unwrap_or_else(|e| e.into_inner());
                write!(f, "DataCache::Lru(len={}, cap={})", cache.len(), cache.cap())
            }
        }
    }
}
