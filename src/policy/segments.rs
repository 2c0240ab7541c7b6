//! Three-segment (hot/warm/cold) replacement state machine.
//!
//! The cache partitions its capacity across three FIFO segments and moves
//! entries between them based on one bit of access history:
//!
//! ```text
//!                insert
//!                  │
//!                  ▼
//!   ┌─────────── HOT ───────────┐    recent arrivals      (~10%)
//!   │ head                 tail │
//!   └───┬───────────────────────┘
//!       │ overflow: accessed?
//!       │    yes ──────────────────────────────┐
//!       │    no                                ▼
//!       ▼                        ┌─────────── WARM ──────────┐ (~80%)
//!   ┌─────────── COLD ──────────┐│ head                 tail │
//!   │ head                 tail ││   overflow: accessed?     │
//!   └───┬───────────────────────┘│     yes → warm tail       │
//!       │ overflow: accessed?    │     no  → cold tail       │
//!       │   yes → warm tail      └───────────────────────────┘
//!       │   no  → evict  ◄── TinyLFU duel when a hot demotee
//!       ▼                     wants a slot in a full cold
//!     removed
//! ```
//!
//! Expiration overrides every route: an entry whose policy says
//! `should_discard` is removed no matter what its access flag says.
//!
//! ## Ordering guarantees
//!
//! Within a segment, insertion order is preserved (FIFO). Across segments,
//! cold entries are evicted before warm entries, and hot entries never
//! evict directly (hot overflow demotes first). For entries of equal
//! recency the earlier insert is the earlier evictee.
//!
//! ## Ownership
//!
//! All methods require `&mut self`: the queues belong to whichever thread
//! holds the cache's maintenance lock. Entries can be flagged as removed
//! concurrently, so every pop skips entries whose `was_removed` flag or
//! `PendingRemove` tag shows they are already gone, keeping live counts
//! exact without traversing queues on removal.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::{ConfigError, InvariantError};
use crate::policy::admission::TinyLfuAdmission;
use crate::policy::expiry::ExpiryPolicy;
use crate::store::entry::{Entry, SegmentTag};

/// Where routing sends an entry next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Move to the warm tail.
    Warm,
    /// Move to the cold tail.
    Cold,
    /// Evict from the cache.
    Remove,
}

/// Capacity split across the three segments.
///
/// Hot and cold each take ~10% (at least one slot), warm keeps the rest,
/// so the total must be at least 3.
///
/// # Example
///
/// ```
/// use tiercache::policy::segments::SegmentCapacity;
///
/// let caps = SegmentCapacity::try_new(100).unwrap();
/// assert_eq!((caps.hot, caps.warm, caps.cold), (10, 80, 10));
///
/// let small = SegmentCapacity::try_new(9).unwrap();
/// assert_eq!((small.hot, small.warm, small.cold), (1, 7, 1));
///
/// assert!(SegmentCapacity::try_new(2).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentCapacity {
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
}

impl SegmentCapacity {
    /// Splits `total` into hot/warm/cold quotas.
    pub fn try_new(total: usize) -> Result<Self, ConfigError> {
        if total < 3 {
            return Err(ConfigError::new(format!(
                "capacity must be at least 3 to partition hot/warm/cold, got {total}"
            )));
        }
        let hot = (total / 10).max(1);
        let cold = (total / 10).max(1);
        Self::try_with(hot, total - hot - cold, cold)
    }

    /// Builds an explicit split; every segment needs at least one slot.
    pub fn try_with(hot: usize, warm: usize, cold: usize) -> Result<Self, ConfigError> {
        if hot == 0 || warm == 0 || cold == 0 {
            return Err(ConfigError::new(
                "every segment requires a capacity of at least 1",
            ));
        }
        Ok(Self { hot, warm, cold })
    }

    /// Total capacity across the three segments.
    #[inline]
    pub fn total(&self) -> usize {
        self.hot + self.warm + self.cold
    }
}

/// The hot/warm/cold queues plus their live-entry accounting.
#[derive(Debug)]
pub struct SegmentedQueues<K, V> {
    hot: VecDeque<Arc<Entry<K, V>>>,
    warm: VecDeque<Arc<Entry<K, V>>>,
    cold: VecDeque<Arc<Entry<K, V>>>,
    live_hot: usize,
    live_warm: usize,
    live_cold: usize,
    caps: SegmentCapacity,
}

impl<K, V> SegmentedQueues<K, V>
where
    K: Eq + Hash,
{
    /// Creates empty queues for the given capacity split.
    pub fn new(caps: SegmentCapacity) -> Self {
        Self {
            hot: VecDeque::with_capacity(caps.hot + 1),
            warm: VecDeque::with_capacity(caps.warm + 1),
            cold: VecDeque::with_capacity(caps.cold + 1),
            live_hot: 0,
            live_warm: 0,
            live_cold: 0,
            caps,
        }
    }

    /// The configured capacity split.
    #[inline]
    pub fn capacity(&self) -> SegmentCapacity {
        self.caps
    }

    /// Live entries across all segments.
    #[inline]
    pub fn live_total(&self) -> usize {
        self.live_hot + self.live_warm + self.live_cold
    }

    /// Live entries per segment, in (hot, warm, cold) order.
    #[inline]
    pub fn live_counts(&self) -> (usize, usize, usize) {
        (self.live_hot, self.live_warm, self.live_cold)
    }

    /// Places a freshly inserted entry at the hot tail.
    ///
    /// Entries flagged removed before their add event drained are dropped
    /// on the floor.
    pub fn push_hot(&mut self, entry: Arc<Entry<K, V>>) {
        if entry.is_removed() {
            entry.set_segment(SegmentTag::PendingRemove);
            return;
        }
        entry.set_segment(SegmentTag::Hot);
        self.hot.push_back(entry);
        self.live_hot += 1;
    }

    fn push_warm(&mut self, entry: Arc<Entry<K, V>>) {
        entry.set_segment(SegmentTag::Warm);
        self.warm.push_back(entry);
        self.live_warm += 1;
    }

    fn push_cold(&mut self, entry: Arc<Entry<K, V>>) {
        entry.set_segment(SegmentTag::Cold);
        self.cold.push_back(entry);
        self.live_cold += 1;
    }

    /// Restores a duel-surviving victim to the cold head, keeping its
    /// eviction priority.
    fn restore_cold_head(&mut self, entry: Arc<Entry<K, V>>) {
        entry.set_segment(SegmentTag::Cold);
        self.cold.push_front(entry);
        self.live_cold += 1;
    }

    /// Adjusts live accounting for an entry removed through the index.
    ///
    /// Idempotent: once the tag reads `PendingRemove` the entry no longer
    /// counts anywhere.
    pub fn note_removed(&mut self, entry: &Arc<Entry<K, V>>) {
        match entry.segment() {
            SegmentTag::Hot => self.live_hot -= 1,
            SegmentTag::Warm => self.live_warm -= 1,
            SegmentTag::Cold => self.live_cold -= 1,
            SegmentTag::Detached | SegmentTag::PendingRemove => {},
        }
        entry.set_segment(SegmentTag::PendingRemove);
    }

    /// Pops the next live entry from a segment, discarding zombies.
    fn pop_live(&mut self, segment: SegmentTag) -> Option<Arc<Entry<K, V>>> {
        loop {
            let popped = match segment {
                SegmentTag::Hot => self.hot.pop_front(),
                SegmentTag::Warm => self.warm.pop_front(),
                SegmentTag::Cold => self.cold.pop_front(),
                SegmentTag::Detached | SegmentTag::PendingRemove => None,
            }?;
            if popped.segment() == SegmentTag::PendingRemove {
                // note_removed already balanced the live count.
                continue;
            }
            match segment {
                SegmentTag::Hot => self.live_hot -= 1,
                SegmentTag::Warm => self.live_warm -= 1,
                SegmentTag::Cold => self.live_cold -= 1,
                _ => unreachable!(),
            }
            if popped.is_removed() {
                // Removal raced ahead of its write event.
                popped.set_segment(SegmentTag::PendingRemove);
                continue;
            }
            return Some(popped);
        }
    }

    fn evict(&mut self, entry: Arc<Entry<K, V>>, evicted: &mut Vec<Arc<Entry<K, V>>>) {
        entry.mark_removed();
        entry.set_segment(SegmentTag::PendingRemove);
        evicted.push(entry);
    }

    /// Routes a hot-segment overflow entry.
    pub fn route_hot(entry: &Entry<K, V>) -> RouteDecision {
        if entry.take_accessed() {
            RouteDecision::Warm
        } else {
            RouteDecision::Cold
        }
    }

    /// Routes a warm-segment overflow entry.
    pub fn route_warm(entry: &Entry<K, V>) -> RouteDecision {
        if entry.take_accessed() {
            RouteDecision::Warm
        } else {
            RouteDecision::Cold
        }
    }

    /// Routes a cold-segment overflow entry.
    pub fn route_cold(entry: &Entry<K, V>) -> RouteDecision {
        if entry.take_accessed() {
            RouteDecision::Warm
        } else {
            RouteDecision::Remove
        }
    }

    /// Restores segment quotas, applying routing, expiration overrides and
    /// (when enabled) TinyLFU admission duels.
    ///
    /// Evicted entries are appended to `evicted`; the caller unmaps them
    /// from the index. The pass is bounded so that readers re-setting
    /// access flags mid-pass cannot spin it forever; any residual overflow
    /// is picked up by the next maintenance cycle.
    pub fn rebalance<P: ExpiryPolicy<K, V>>(
        &mut self,
        policy: &P,
        mut admission: Option<&mut TinyLfuAdmission>,
        evicted: &mut Vec<Arc<Entry<K, V>>>,
    ) {
        let check_expiry = policy.can_discard();
        let mut fuel = 2 * self.live_total() + 8;

        while fuel > 0 {
            fuel -= 1;

            if self.live_hot > self.caps.hot {
                if let Some(entry) = self.pop_live(SegmentTag::Hot) {
                    if check_expiry && policy.should_discard(&entry) {
                        self.evict(entry, evicted);
                    } else {
                        match Self::route_hot(&entry) {
                            RouteDecision::Warm => self.push_warm(entry),
                            RouteDecision::Cold => {
                                self.admit_to_cold(entry, policy, admission.as_deref_mut(), evicted);
                            },
                            RouteDecision::Remove => self.evict(entry, evicted),
                        }
                    }
                }
                continue;
            }

            if self.live_warm > self.caps.warm {
                if let Some(entry) = self.pop_live(SegmentTag::Warm) {
                    if check_expiry && policy.should_discard(&entry) {
                        self.evict(entry, evicted);
                    } else {
                        match Self::route_warm(&entry) {
                            RouteDecision::Warm => self.push_warm(entry),
                            RouteDecision::Cold => self.push_cold(entry),
                            RouteDecision::Remove => self.evict(entry, evicted),
                        }
                    }
                }
                continue;
            }

            if self.live_cold > self.caps.cold {
                if let Some(entry) = self.pop_live(SegmentTag::Cold) {
                    if check_expiry && policy.should_discard(&entry) {
                        self.evict(entry, evicted);
                    } else {
                        match Self::route_cold(&entry) {
                            RouteDecision::Warm => self.push_warm(entry),
                            RouteDecision::Cold => self.push_cold(entry),
                            RouteDecision::Remove => self.evict(entry, evicted),
                        }
                    }
                }
                continue;
            }

            break;
        }
    }

    /// Admits a hot demotee into cold, duelling the cold head when the
    /// segment is full and frequency-aware admission is on.
    fn admit_to_cold<P: ExpiryPolicy<K, V>>(
        &mut self,
        candidate: Arc<Entry<K, V>>,
        policy: &P,
        admission: Option<&mut TinyLfuAdmission>,
        evicted: &mut Vec<Arc<Entry<K, V>>>,
    ) {
        let check_expiry = policy.can_discard();
        while self.live_cold >= self.caps.cold {
            let victim = match self.pop_live(SegmentTag::Cold) {
                Some(victim) => victim,
                None => break,
            };
            if check_expiry && policy.should_discard(&victim) {
                self.evict(victim, evicted);
                continue;
            }
            if victim.take_accessed() {
                self.push_warm(victim);
                continue;
            }
            if let Some(admission) = &admission {
                if !admission.admit(candidate.hash(), victim.hash()) {
                    // Incumbent keeps its slot (ties included).
                    self.restore_cold_head(victim);
                    self.evict(candidate, evicted);
                    return;
                }
            }
            self.evict(victim, evicted);
        }
        self.push_cold(candidate);
    }

    /// Single best-effort pass removing expired entries from every
    /// segment. Non-expired entries keep their FIFO positions.
    pub fn trim_expired<P: ExpiryPolicy<K, V>>(
        &mut self,
        policy: &P,
        evicted: &mut Vec<Arc<Entry<K, V>>>,
    ) {
        if !policy.can_discard() {
            return;
        }
        for segment in [SegmentTag::Hot, SegmentTag::Warm, SegmentTag::Cold] {
            let len = match segment {
                SegmentTag::Hot => self.hot.len(),
                SegmentTag::Warm => self.warm.len(),
                SegmentTag::Cold => self.cold.len(),
                _ => 0,
            };
            for _ in 0..len {
                let entry = match self.pop_live(segment) {
                    Some(entry) => entry,
                    None => break,
                };
                if policy.should_discard(&entry) {
                    self.evict(entry, evicted);
                } else {
                    match segment {
                        SegmentTag::Hot => {
                            entry.set_segment(SegmentTag::Hot);
                            self.hot.push_back(entry);
                            self.live_hot += 1;
                        },
                        SegmentTag::Warm => self.push_warm(entry),
                        SegmentTag::Cold => self.push_cold(entry),
                        _ => unreachable!(),
                    }
                }
            }
        }
    }

    /// Evicts up to `count` live entries, coldest segments first, oldest
    /// entries first within each segment.
    pub fn trim(&mut self, count: usize, evicted: &mut Vec<Arc<Entry<K, V>>>) {
        let mut remaining = count;
        for segment in [SegmentTag::Cold, SegmentTag::Warm, SegmentTag::Hot] {
            while remaining > 0 {
                match self.pop_live(segment) {
                    Some(entry) => {
                        self.evict(entry, evicted);
                        remaining -= 1;
                    },
                    None => break,
                }
            }
        }
    }

    /// Drops every queued entry and zeroes the accounting.
    pub fn clear(&mut self) {
        for queue in [&mut self.hot, &mut self.warm, &mut self.cold] {
            for entry in queue.drain(..) {
                entry.set_segment(SegmentTag::PendingRemove);
            }
        }
        self.live_hot = 0;
        self.live_warm = 0;
        self.live_cold = 0;
    }

    /// Verifies internal accounting. Intended for tests and debug builds.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        let live = |queue: &VecDeque<Arc<Entry<K, V>>>, tag: SegmentTag| {
            queue
                .iter()
                .filter(|entry| entry.segment() == tag && !entry.is_removed())
                .count()
        };

        let counted_hot = live(&self.hot, SegmentTag::Hot);
        if counted_hot != self.live_hot {
            return Err(InvariantError::new(format!(
                "hot live count {} does not match queue contents {counted_hot}",
                self.live_hot
            )));
        }
        let counted_warm = live(&self.warm, SegmentTag::Warm);
        if counted_warm != self.live_warm {
            return Err(InvariantError::new(format!(
                "warm live count {} does not match queue contents {counted_warm}",
                self.live_warm
            )));
        }
        let counted_cold = live(&self.cold, SegmentTag::Cold);
        if counted_cold != self.live_cold {
            return Err(InvariantError::new(format!(
                "cold live count {} does not match queue contents {counted_cold}",
                self.live_cold
            )));
        }
        Ok(())
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::policy::expiry::{ExpiryStamp, NoExpiry};
    use proptest::prelude::*;

    fn entry(key: u64) -> Arc<Entry<u64, u64>> {
        Arc::new(Entry::new(key, Arc::new(key), ExpiryStamp::never()))
    }

    proptest! {
        /// After every rebalance, live totals respect the configured
        /// capacity and the accounting matches the queues.
        #[cfg_attr(miri, ignore)]
        #[test]
        fn prop_live_total_bounded(
            total in 3usize..40,
            ops in prop::collection::vec((any::<u64>(), any::<bool>()), 0..120)
        ) {
            let caps = SegmentCapacity::try_new(total).unwrap();
            let mut queues = SegmentedQueues::new(caps);
            let mut evicted = Vec::new();

            for (key, accessed) in ops {
                let e = entry(key);
                if accessed {
                    e.mark_accessed();
                }
                queues.push_hot(e);
                queues.rebalance(&NoExpiry, None, &mut evicted);

                prop_assert!(queues.live_total() <= caps.total());
                prop_assert!(
                    queues.check_invariants().is_ok(),
                    "invariant violated after inserting {}",
                    key
                );
            }
        }
    }
}
