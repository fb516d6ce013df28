use std::hash::{BuildHasher, Hash};
use std::sync::{Arc, Mutex, RwLock};

use ahash::{AHashMap, RandomState};
use tracing::debug;

/// Default number of entries a bucket holds before it splits
pub const DEFAULT_BUCKET_CAPACITY: usize = 64;

/// A concurrent hash table with extensible hashing.
///
/// Keys are routed through a power-of-two directory: the low `global_depth`
/// bits of a key's hash select a directory slot, and each slot holds a handle
/// into a grow-only bucket arena. A bucket with `local_depth <
/// global_depth` is aliased by `2^(global_depth - local_depth)` slots. When a
/// bucket overflows it splits in place: only its own entries are
/// redistributed, and the directory doubles only when the bucket's new local
/// depth would exceed the global depth. Buckets are never merged and the
/// directory never shrinks, so deletions leave sparse or empty buckets
/// behind.
///
/// Lock discipline: the directory (slots, global depth, bucket arena) sits
/// under one `RwLock`; each bucket carries its own `Mutex` over its contents.
/// Locks are only ever taken in table -> bucket order. Content operations
/// resolve the route under a momentary table read lock, drop it, lock the
/// bucket, and then validate the bucket's bit `pattern` against the key's
/// hash; a mismatch means a concurrent split moved the key's home between
/// resolution and lock acquisition, and the operation re-routes. Splits run
/// under the table write lock, so the validation needs no table lock of its
/// own.
pub struct ExtendibleHashTable<K, V, S = RandomState> {
    directory: RwLock<Directory<K, V>>,
    bucket_capacity: usize,
    hasher: S,
}

struct Directory<K, V> {
    global_depth: usize,
    /// Slot index -> handle into `buckets`
    slots: Vec<usize>,
    /// Grow-only bucket arena; handles stay valid across splits
    buckets: Vec<Arc<Bucket<K, V>>>,
}

struct Bucket<K, V> {
    inner: Mutex<BucketInner<K, V>>,
}

struct BucketInner<K, V> {
    /// Number of low hash bits every key in this bucket shares
    local_depth: usize,
    /// The shared low `local_depth` bits; identifies this bucket across splits
    pattern: usize,
    items: AHashMap<K, V>,
}

fn low_bits(hash: usize, depth: usize) -> usize {
    hash & ((1 << depth) - 1)
}

impl<K, V> ExtendibleHashTable<K, V, RandomState>
where
    K: Hash + Eq,
    V: Clone,
{
    /// Create a table whose buckets split once they exceed `bucket_capacity`
    pub fn new(bucket_capacity: usize) -> Self {
        Self::with_hasher(bucket_capacity, RandomState::new())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq,
    V: Clone,
    S: BuildHasher,
{
    /// Create a table routing keys with the given hasher
    pub fn with_hasher(bucket_capacity: usize, hasher: S) -> Self {
        assert!(bucket_capacity > 0, "bucket capacity must be positive");

        let bucket = Arc::new(Bucket {
            inner: Mutex::new(BucketInner {
                local_depth: 0,
                pattern: 0,
                items: AHashMap::new(),
            }),
        });

        Self {
            directory: RwLock::new(Directory {
                global_depth: 0,
                slots: vec![0],
                buckets: vec![bucket],
            }),
            bucket_capacity,
            hasher,
        }
    }

    /// Number of low hash bits used to route keys at the directory level
    pub fn global_depth(&self) -> usize {
        self.directory.read().unwrap().global_depth
    }

    /// Local depth of the bucket behind directory slot `slot_index`, or
    /// `None` when the slot is out of range or its bucket holds no entries
    pub fn local_depth(&self, slot_index: usize) -> Option<usize> {
        let directory = self.directory.read().unwrap();
        let handle = *directory.slots.get(slot_index)?;
        let bucket = directory.buckets[handle].inner.lock().unwrap();
        if bucket.items.is_empty() {
            None
        } else {
            Some(bucket.local_depth)
        }
    }

    /// Number of buckets allocated so far (splits only ever add one)
    pub fn num_buckets(&self) -> usize {
        self.directory.read().unwrap().buckets.len()
    }

    /// Look up the value associated with `key`
    pub fn find(&self, key: &K) -> Option<V> {
        let hash = self.hash(key);
        loop {
            let bucket = self.route(hash);
            let guard = bucket.inner.lock().unwrap();
            if low_bits(hash, guard.local_depth) != guard.pattern {
                continue; // split raced us between routing and locking
            }
            return guard.items.get(key).cloned();
        }
    }

    /// Insert or overwrite the entry for `key`
    pub fn insert(&self, key: K, value: V) {
        let hash = self.hash(&key);
        loop {
            let bucket = self.route(hash);
            {
                let mut guard = bucket.inner.lock().unwrap();
                if low_bits(hash, guard.local_depth) != guard.pattern {
                    continue;
                }
                if guard.items.contains_key(&key) || guard.items.len() < self.bucket_capacity {
                    guard.items.insert(key, value);
                    return;
                }
            }
            // Bucket overflow: split it, then retry the insert from routing.
            // The key may land in the new sibling.
            self.split(hash);
        }
    }

    /// Remove the entry for `key`, reporting whether it was present.
    /// Buckets are never merged and the directory never shrinks.
    pub fn remove(&self, key: &K) -> bool {
        let hash = self.hash(key);
        loop {
            let bucket = self.route(hash);
            let mut guard = bucket.inner.lock().unwrap();
            if low_bits(hash, guard.local_depth) != guard.pattern {
                continue;
            }
            return guard.items.remove(key).is_some();
        }
    }

    fn hash(&self, key: &K) -> usize {
        self.hasher.hash_one(key) as usize
    }

    /// Resolve `hash` to its bucket under a momentary table read lock
    fn route(&self, hash: usize) -> Arc<Bucket<K, V>> {
        let directory = self.directory.read().unwrap();
        let handle = directory.slots[low_bits(hash, directory.global_depth)];
        Arc::clone(&directory.buckets[handle])
    }

    /// Split the bucket `hash` routes to, doubling the directory when the
    /// bucket's new local depth exceeds the global depth
    fn split(&self, hash: usize) {
        let mut directory = self.directory.write().unwrap();

        let slot = low_bits(hash, directory.global_depth);
        let handle = directory.slots[slot];
        let bucket = Arc::clone(&directory.buckets[handle]);
        let mut guard = bucket.inner.lock().unwrap();

        if guard.items.len() < self.bucket_capacity {
            return; // another thread split this bucket first
        }

        let split_bit = 1usize << guard.local_depth;
        guard.local_depth += 1;

        if guard.local_depth > directory.global_depth {
            // Double the directory, duplicating every slot reference
            let len = directory.slots.len();
            directory.slots.extend_from_within(0..len);
            directory.global_depth += 1;
        }

        // Partition the entries by the newly significant hash bit: entries
        // with the bit set move to the sibling, the rest stay
        let drained = std::mem::take(&mut guard.items);
        let mut sibling_items = AHashMap::with_capacity(drained.len());
        for (key, value) in drained {
            if self.hash(&key) & split_bit != 0 {
                sibling_items.insert(key, value);
            } else {
                guard.items.insert(key, value);
            }
        }

        let sibling = Arc::new(Bucket {
            inner: Mutex::new(BucketInner {
                local_depth: guard.local_depth,
                pattern: guard.pattern | split_bit,
                items: sibling_items,
            }),
        });
        let sibling_handle = directory.buckets.len();
        directory.buckets.push(sibling);

        // Repoint every slot that aliased the split bucket and has the new
        // bit set in its own index
        for (index, slot_handle) in directory.slots.iter_mut().enumerate() {
            if *slot_handle == handle && index & split_bit != 0 {
                *slot_handle = sibling_handle;
            }
        }

        debug!(
            global_depth = directory.global_depth,
            num_buckets = directory.buckets.len(),
            "split bucket"
        );
    }
}
