//! Bounded in-memory caches shared across in-flight queries.
//!
//! Query expansion, re-ranking, and the lexical index each own one of
//! these. They are constructed explicitly and injected, never process-wide
//! singletons, so lifecycle and clearing stay in the owner's hands.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::PoisonError;

use lru::LruCache;

/// Thread-safe LRU cache with a fixed capacity.
///
/// Safe for concurrent read/insert from multiple in-flight queries; every
/// operation takes the lock briefly and clones values out.
#[derive(Debug)]
pub struct BoundedCache<K: Hash + Eq, V: Clone> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> BoundedCache<K, V> {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up a key, marking it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).cloned()
    }

    /// Insert a value, evicting the least recently used entry when full.
    pub fn insert(&self, key: K, value: V) {
        self.lock().put(key, value);
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<K, V>> {
        // A poisoned lock only means a panic mid-insert elsewhere; the
        // cache content is still valid to read.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
