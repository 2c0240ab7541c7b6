//! Sharded concurrent key→entry index.
//!
//! The index answers "which entry holds this key" on every cache operation
//! while segments and buffers stay maintenance-private, so it must take
//! concurrent reads and writes. Rather than one global lock, keys hash to
//! one of a power-of-two number of shards, each a `parking_lot::RwLock`
//! around an `FxHashMap`; contention drops by the shard count and the
//! common read path takes a single uncontended read lock.
//!
//! ## Architecture
//!
//! ```text
//!   key ── FxHasher ──► hash ──► shard = hash & (shards - 1)
//!
//!   ┌───────────────┬───────────────┬───────────────┬───────────────┐
//!   │ RwLock<map 0> │ RwLock<map 1> │ RwLock<map 2> │ RwLock<map 3> │
//!   │  k → Arc<Entry>  per shard                                    │
//!   └───────────────┴───────────────┴───────────────┴───────────────┘
//! ```
//!
//! Find/insert/remove are atomic per key because each key lives in exactly
//! one shard and every mutation holds that shard's write lock.

use std::hash::Hash;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::ds::bitops::ceil_pow2;
use crate::store::entry::{Entry, hash_key};

/// Default shard count: enough to keep a busy machine's threads apart.
fn default_shards() -> usize {
    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    ceil_pow2(threads * 4, 4).min(64)
}

/// Concurrently readable and writable key→entry mapping.
#[derive(Debug)]
pub struct ShardedIndex<K, V> {
    shards: Box<[RwLock<FxHashMap<K, Arc<Entry<K, V>>>>]>,
    shard_mask: usize,
}

impl<K, V> ShardedIndex<K, V>
where
    K: Eq + Hash,
{
    /// Creates an index sized for `capacity` entries with a default shard
    /// count derived from available parallelism.
    pub fn new(capacity: usize) -> Self {
        Self::with_shards(capacity, default_shards())
    }

    /// Creates an index with an explicit shard count (rounded to a power
    /// of two).
    pub fn with_shards(capacity: usize, shards: usize) -> Self {
        let shards = ceil_pow2(shards, 1);
        let per_shard = capacity / shards + 1;
        let mut vec = Vec::with_capacity(shards);
        vec.resize_with(shards, || {
            RwLock::new(FxHashMap::with_capacity_and_hasher(
                per_shard,
                Default::default(),
            ))
        });
        Self {
            shards: vec.into_boxed_slice(),
            shard_mask: shards - 1,
        }
    }

    #[inline]
    fn shard(&self, hash: u64) -> &RwLock<FxHashMap<K, Arc<Entry<K, V>>>> {
        &self.shards[(hash as usize) & self.shard_mask]
    }

    /// Looks up the entry for `key`.
    pub fn get(&self, key: &K) -> Option<Arc<Entry<K, V>>> {
        self.shard(hash_key(key)).read().get(key).cloned()
    }

    /// Returns `true` when `key` maps to an entry (removed or not).
    pub fn contains(&self, key: &K) -> bool {
        self.shard(hash_key(key)).read().contains_key(key)
    }

    /// Maps `key` to `entry` unless a live entry is already present.
    ///
    /// A present-but-removed zombie is displaced. On conflict the existing
    /// live entry is returned so the caller can treat the insert as a hit
    /// or retry an update against it.
    pub fn try_insert(
        &self,
        key: K,
        entry: Arc<Entry<K, V>>,
    ) -> Result<(), Arc<Entry<K, V>>> {
        let mut shard = self.shard(entry.hash()).write();
        match shard.get(&key) {
            Some(existing) if !existing.is_removed() => Err(Arc::clone(existing)),
            _ => {
                shard.insert(key, entry);
                Ok(())
            },
        }
    }

    /// Removes the mapping for `key`, returning the entry that held it.
    ///
    /// Entries already flagged as removed are left for maintenance and
    /// reported as absent.
    pub fn remove(&self, key: &K) -> Option<Arc<Entry<K, V>>> {
        let mut shard = self.shard(hash_key(key)).write();
        match shard.get(key) {
            Some(existing) if !existing.is_removed() => shard.remove(key),
            _ => None,
        }
    }

    /// Removes the mapping for `entry`'s key only while it still points at
    /// this exact entry.
    ///
    /// Eviction uses this so it can never unmap a newer entry that
    /// re-used the key.
    pub fn remove_if_same(&self, entry: &Arc<Entry<K, V>>) -> bool {
        let mut shard = self.shard(entry.hash()).write();
        match shard.get(entry.key()) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                shard.remove(entry.key());
                true
            },
            _ => false,
        }
    }

    /// Number of mapped keys. Snapshot across shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Returns `true` when no keys are mapped.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    /// Unmaps every key, invoking `f` on each drained entry.
    pub fn clear_with(&self, mut f: impl FnMut(Arc<Entry<K, V>>)) {
        for shard in self.shards.iter() {
            let mut shard = shard.write();
            for (_, entry) in shard.drain() {
                f(entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::expiry::ExpiryStamp;

    fn entry(key: u64) -> Arc<Entry<u64, u64>> {
        Arc::new(Entry::new(key, Arc::new(key * 10), ExpiryStamp::never()))
    }

    #[test]
    fn insert_then_get() {
        let index: ShardedIndex<u64, u64> = ShardedIndex::new(16);
        assert!(index.try_insert(1, entry(1)).is_ok());
        let found = index.get(&1).unwrap();
        assert_eq!(*found.value(), 10);
        assert!(index.get(&2).is_none());
    }

    #[test]
    fn try_insert_reports_live_conflict() {
        let index: ShardedIndex<u64, u64> = ShardedIndex::new(16);
        index.try_insert(1, entry(1)).unwrap();
        let second = entry(1);
        let existing = index.try_insert(1, second).unwrap_err();
        assert_eq!(*existing.value(), 10);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn try_insert_displaces_zombie() {
        let index: ShardedIndex<u64, u64> = ShardedIndex::new(16);
        let old = entry(1);
        index.try_insert(1, Arc::clone(&old)).unwrap();
        old.mark_removed();

        assert!(index.try_insert(1, entry(1)).is_ok());
        let found = index.get(&1).unwrap();
        assert!(!found.is_removed());
    }

    #[test]
    fn remove_skips_zombies() {
        let index: ShardedIndex<u64, u64> = ShardedIndex::new(16);
        let e = entry(1);
        index.try_insert(1, Arc::clone(&e)).unwrap();
        e.mark_removed();
        assert!(index.remove(&1).is_none());
        // The zombie mapping is left in place for maintenance.
        assert!(index.contains(&1));
    }

    #[test]
    fn remove_if_same_guards_against_reuse() {
        let index: ShardedIndex<u64, u64> = ShardedIndex::new(16);
        let first = entry(1);
        index.try_insert(1, Arc::clone(&first)).unwrap();

        // Key re-added with a new entry after the first was removed.
        first.mark_removed();
        let second = entry(1);
        index.try_insert(1, Arc::clone(&second)).unwrap();

        assert!(!index.remove_if_same(&first));
        assert!(index.contains(&1));
        assert!(index.remove_if_same(&second));
        assert!(!index.contains(&1));
    }

    #[test]
    fn len_and_clear() {
        let index: ShardedIndex<u64, u64> = ShardedIndex::new(16);
        for key in 0..10 {
            index.try_insert(key, entry(key)).unwrap();
        }
        assert_eq!(index.len(), 10);

        let mut drained = 0;
        index.clear_with(|entry| {
            entry.mark_removed();
            drained += 1;
        });
        assert_eq!(drained, 10);
        assert!(index.is_empty());
    }

    #[test]
    fn concurrent_inserts_and_gets() {
        let index: Arc<ShardedIndex<u64, u64>> = Arc::new(ShardedIndex::new(1024));
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        let key = t * 1_000 + i;
                        index.try_insert(key, entry(key)).unwrap();
                        assert!(index.get(&key).is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(index.len(), 1_000);
    }
}
