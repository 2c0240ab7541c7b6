//! Frequency-aware admission (TinyLFU).
//!
//! A plain segmented LRU admits every new arrival into the cold segment,
//! which lets a burst of one-hit wonders flush resident entries that are
//! re-read regularly. TinyLFU fixes this with a small frequency sketch:
//! every drained access bumps the key's estimated frequency, and when a
//! cold-bound candidate meets a full cold segment, the candidate and the
//! segment's head victim duel on estimated frequency. The lower-frequency
//! side is evicted; ties keep the incumbent, so a newcomer must prove
//! itself strictly more popular to displace a resident.
//!
//! The sketch is only ever touched by the maintenance owner, so this type
//! is deliberately single-threaded.

use crate::ds::sketch::FrequencySketch;

/// Sketch-backed admission filter for the cold segment.
///
/// # Example
///
/// ```
/// use tiercache::policy::admission::TinyLfuAdmission;
///
/// let mut admission = TinyLfuAdmission::new(64);
/// for _ in 0..5 {
///     admission.record_access(1);
/// }
/// admission.record_access(2);
///
/// // The popular key displaces the rare one, not vice versa.
/// assert!(admission.admit(1, 2));
/// assert!(!admission.admit(2, 1));
///
/// // Ties favour the incumbent.
/// assert!(!admission.admit(3, 4));
/// ```
#[derive(Debug)]
pub struct TinyLfuAdmission {
    sketch: FrequencySketch,
}

impl TinyLfuAdmission {
    /// Creates an admission filter sized for `capacity` cache entries.
    pub fn new(capacity: usize) -> Self {
        Self { sketch: FrequencySketch::new(capacity) }
    }

    /// Records one access for the key hash. Called for every drained read
    /// hit and every applied write.
    #[inline]
    pub fn record_access(&mut self, key_hash: u64) {
        self.sketch.increment(key_hash);
    }

    /// Decides a cold-segment duel: `true` admits the candidate (the
    /// victim is evicted), `false` keeps the incumbent victim.
    #[inline]
    pub fn admit(&self, candidate_hash: u64, victim_hash: u64) -> bool {
        self.sketch.estimate(candidate_hash) > self.sketch.estimate(victim_hash)
    }

    /// Estimated frequency for a key hash.
    #[inline]
    pub fn estimate(&self, key_hash: u64) -> u32 {
        self.sketch.estimate(key_hash)
    }

    /// Re-derives the sketch's sample size for a new capacity.
    pub fn reset_sample_size(&mut self, capacity: usize) {
        self.sketch.reset_sample_size(capacity);
    }

    /// Forgets all recorded history.
    pub fn clear(&mut self) {
        self.sketch.clear();
    }
}
