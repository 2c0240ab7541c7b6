//! Shared cache entry (node) state.
//!
//! An [`Entry`] is the unit the index, the segment queues and the read
//! buffers all point at, shared as `Arc<Entry<K, V>>`. Its mutable state is
//! designed around who writes what:
//!
//! | Field          | Written by                  | Protection               |
//! |----------------|-----------------------------|--------------------------|
//! | `value`        | update paths                | per-entry `RwLock`       |
//! | `was_accessed` | readers (hit path)          | relaxed atomic, lossy    |
//! | `was_removed`  | removal paths, maintenance  | acquire/release atomic   |
//! | `segment`      | maintenance only            | relaxed atomic tag       |
//! | `stamp`        | expiry policy hooks         | sequence-locked slot     |
//!
//! The access flag is deliberately unsynchronized: a lost store costs at
//! most one missed promotion, never correctness. The expiry stamp is two
//! words wide, so it goes through a [`SeqLockSlot`] and readers always see
//! a matched (written, ttl) pair.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHasher;

use crate::ds::seqlock::SeqLockSlot;
use crate::policy::expiry::ExpiryStamp;

/// Hashes a key with the same hasher the index shards use.
#[inline]
pub(crate) fn hash_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Which segment queue an entry currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegmentTag {
    /// Created but not yet placed by maintenance.
    Detached = 0,
    /// Recent arrivals.
    Hot = 1,
    /// Re-accessed residents.
    Warm = 2,
    /// Demoted one-hit wonders, next in line for eviction.
    Cold = 3,
    /// Removed or evicted; queues drop it on sight.
    PendingRemove = 4,
}

impl SegmentTag {
    #[inline]
    fn from_u8(tag: u8) -> Self {
        match tag {
            1 => Self::Hot,
            2 => Self::Warm,
            3 => Self::Cold,
            4 => Self::PendingRemove,
            _ => Self::Detached,
        }
    }
}

/// A cache node: key, value cell and replacement/expiry bookkeeping.
pub struct Entry<K, V> {
    key: K,
    hash: u64,
    value: RwLock<Arc<V>>,
    segment: AtomicU8,
    was_accessed: AtomicBool,
    was_removed: AtomicBool,
    stamp: SeqLockSlot<ExpiryStamp>,
}

impl<K: Hash, V> Entry<K, V> {
    /// Creates a detached entry carrying the policy's initial stamp.
    pub fn new(key: K, value: Arc<V>, stamp: ExpiryStamp) -> Self {
        let hash = hash_key(&key);
        Self {
            key,
            hash,
            value: RwLock::new(value),
            segment: AtomicU8::new(SegmentTag::Detached as u8),
            was_accessed: AtomicBool::new(false),
            was_removed: AtomicBool::new(false),
            stamp: SeqLockSlot::new(stamp),
        }
    }
}

impl<K, V> Entry<K, V> {
    /// The entry's key.
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// The key's hash, computed once at creation and reused for shard
    /// selection and sketch updates.
    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Returns a handle to the current value.
    #[inline]
    pub fn value(&self) -> Arc<V> {
        Arc::clone(&self.value.read())
    }

    /// Replaces the value, returning the previous one.
    ///
    /// The write lock is the per-entry mutual exclusion the update paths
    /// rely on.
    pub fn set_value(&self, value: Arc<V>) -> Arc<V> {
        std::mem::replace(&mut *self.value.write(), value)
    }

    /// Records a read hit. Lossy by design.
    #[inline]
    pub fn mark_accessed(&self) {
        self.was_accessed.store(true, Ordering::Relaxed);
    }

    /// Consumes the access flag, returning whether it was set.
    #[inline]
    pub fn take_accessed(&self) -> bool {
        self.was_accessed.swap(false, Ordering::Relaxed)
    }

    /// Returns the access flag without clearing it.
    #[inline]
    pub fn was_accessed(&self) -> bool {
        self.was_accessed.load(Ordering::Relaxed)
    }

    /// Flags the entry as removed. Readers treat it as absent from now on.
    #[inline]
    pub fn mark_removed(&self) {
        self.was_removed.store(true, Ordering::Release);
    }

    /// Returns `true` once the entry has been removed or evicted.
    #[inline]
    pub fn is_removed(&self) -> bool {
        self.was_removed.load(Ordering::Acquire)
    }

    /// Current segment tag. Updated by maintenance only.
    #[inline]
    pub fn segment(&self) -> SegmentTag {
        SegmentTag::from_u8(self.segment.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn set_segment(&self, tag: SegmentTag) {
        self.segment.store(tag as u8, Ordering::Relaxed);
    }

    /// Reads the expiry stamp as a consistent pair.
    #[inline]
    pub fn stamp(&self) -> ExpiryStamp {
        self.stamp.read()
    }

    /// Publishes a new expiry stamp.
    #[inline]
    pub fn set_stamp(&self, stamp: ExpiryStamp) {
        self.stamp.write(stamp);
    }
}

impl<K: fmt::Debug, V> fmt::Debug for Entry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("segment", &self.segment())
            .field("accessed", &self.was_accessed.load(Ordering::Relaxed))
            .field("removed", &self.is_removed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: u64) -> Entry<u64, &'static str> {
        Entry::new(key, Arc::new("value"), ExpiryStamp::never())
    }

    #[test]
    fn new_entry_is_detached_and_live() {
        let e = entry(1);
        assert_eq!(e.segment(), SegmentTag::Detached);
        assert!(!e.was_accessed());
        assert!(!e.is_removed());
        assert_eq!(*e.value(), "value");
    }

    #[test]
    fn hash_matches_key_hasher() {
        let e = entry(42);
        assert_eq!(e.hash(), hash_key(&42u64));
    }

    #[test]
    fn set_value_returns_previous() {
        let e = entry(1);
        let old = e.set_value(Arc::new("replacement"));
        assert_eq!(*old, "value");
        assert_eq!(*e.value(), "replacement");
    }

    #[test]
    fn take_accessed_consumes_flag() {
        let e = entry(1);
        e.mark_accessed();
        assert!(e.take_accessed());
        assert!(!e.take_accessed());
    }

    #[test]
    fn removal_is_sticky() {
        let e = entry(1);
        e.mark_removed();
        assert!(e.is_removed());
    }

    #[test]
    fn segment_tag_round_trips() {
        let e = entry(1);
        for tag in [
            SegmentTag::Hot,
            SegmentTag::Warm,
            SegmentTag::Cold,
            SegmentTag::PendingRemove,
            SegmentTag::Detached,
        ] {
            e.set_segment(tag);
            assert_eq!(e.segment(), tag);
        }
    }

    #[test]
    fn stamp_round_trips() {
        let e = entry(1);
        let stamp = ExpiryStamp { written: 7, ttl: 99 };
        e.set_stamp(stamp);
        assert_eq!(e.stamp(), stamp);
    }
}
