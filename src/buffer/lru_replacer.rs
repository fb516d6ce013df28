use std::hash::Hash;
use std::sync::Mutex;

use lru::LruCache;

/// Eviction-candidate tracker used by the buffer pool.
///
/// The pool registers a frame when its pin count drops to zero and erases it
/// when the frame is pinned again or deleted; the replacer itself never
/// inspects pin counts. Implementations are internally synchronized.
pub trait Replacer<T>: Send + Sync {
    /// Register `value` as an eviction candidate. Re-inserting an already
    /// tracked candidate touches it (moves it to the most-recently-used end).
    fn insert(&self, value: T);

    /// Remove and return the next eviction victim, or `None` when empty
    fn victim(&self) -> Option<T>;

    /// Remove `value` regardless of position, reporting whether it was tracked
    fn erase(&self, value: &T) -> bool;

    /// Number of tracked candidates
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Least-recently-used eviction policy.
///
/// A single `LruCache` provides both the recency-ordered sequence and the
/// lookup index, so every operation is O(1) amortized.
pub struct LruReplacer<T: Hash + Eq> {
    inner: Mutex<LruCache<T, ()>>,
}

impl<T: Hash + Eq> LruReplacer<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LruCache::unbounded()),
        }
    }
}

impl<T: Hash + Eq> Default for LruReplacer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Hash + Eq + Send> Replacer<T> for LruReplacer<T> {
    fn insert(&self, value: T) {
        // put moves an existing entry to the most-recently-used end
        self.inner.lock().unwrap().put(value, ());
    }

    fn victim(&self) -> Option<T> {
        self.inner.lock().unwrap().pop_lru().map(|(value, ())| value)
    }

    fn erase(&self, value: &T) -> bool {
        self.inner.lock().unwrap().pop(value).is_some()
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
