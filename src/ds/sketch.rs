//! 4-bit Count-Min frequency sketch with periodic aging (TinyLFU).
//!
//! Approximates how often each key has been accessed using a fixed table of
//! `u64` words, each packing **sixteen saturating 4-bit counters**. Four
//! hash functions derived from fixed seeds select four words per key, and a
//! per-key offset selects one nibble inside each word; an estimate is the
//! minimum of the four counters (the Count-Min estimator), so collisions
//! can only inflate, never deflate, a frequency.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │ FrequencySketch            table.len() = next pow2 ≥ capacity        │
//!   │                                                                      │
//!   │   word:  [ n15 │ n14 │ … │ n1 │ n0 ]   16 × 4-bit counters           │
//!   │                                                                      │
//!   │   key → spread(h) ─┬─ index_of(h, 0) ──► word w0, nibble j+0         │
//!   │                    ├─ index_of(h, 1) ──► word w1, nibble j+1         │
//!   │                    ├─ index_of(h, 2) ──► word w2, nibble j+2         │
//!   │                    └─ index_of(h, 3) ──► word w3, nibble j+3         │
//!   │                          where j = (h & 3) << 2                      │
//!   │                                                                      │
//!   │   estimate = min(counter0..counter3)                                 │
//!   │   increment = bump each counter < 15; age at sample_size             │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Aging
//!
//! Every `sample_size` increments (10 × capacity, minimum 10) the sketch is
//! **reset**: each counter is halved in one pass over the table, and `size`
//! is adjusted by the residue of odd counters so the next sample period
//! stays accurate. This makes the sketch forget stale history and track the
//! current hot set, as described in the W-TinyLFU paper (Einziger et al.).
//!
//! ## Vector path
//!
//! On x86-64 with AVX2, `estimate` and `increment` read the four table
//! words with a single 256-bit gather and evaluate the four counters in
//! parallel. The result is bit-identical to the scalar path (tests verify
//! agreement); other targets always use the scalar path.
//!
//! ## Thread Safety
//!
//! Not thread-safe. The cache mutates its sketch only inside the
//! maintenance critical section.

use crate::ds::bitops::ceil_pow2;

/// One bit per 4-bit counter slot, at the lowest bit of each nibble.
const ONE_MASK: u64 = 0x1111_1111_1111_1111;

/// Clears the top bit of every nibble so a right shift by one cannot bleed
/// into the neighbouring counter.
const RESET_MASK: u64 = 0x7777_7777_7777_7777;

/// Per-depth multiplicative seeds (taken from FNV-1a and CityHash
/// constants) giving four nearly-independent hash functions.
const SEEDS: [u64; 4] = [
    0xc3a5_c85c_97cb_3127,
    0xb492_b66f_be98_f273,
    0x9ae1_6a3b_2f90_404f,
    0xcbf2_9ce4_8422_2325,
];

/// 4-bit Count-Min sketch sized for a given cache capacity.
///
/// # Example
///
/// ```
/// use tiercache::ds::sketch::FrequencySketch;
///
/// let mut sketch = FrequencySketch::new(64);
/// assert_eq!(sketch.estimate(42), 0);
///
/// for _ in 0..3 {
///     sketch.increment(42);
/// }
/// assert_eq!(sketch.estimate(42), 3);
///
/// // Saturates at 15
/// for _ in 0..100 {
///     sketch.increment(42);
/// }
/// assert_eq!(sketch.estimate(42), 15);
/// ```
#[derive(Debug)]
pub struct FrequencySketch {
    table: Box<[u64]>,
    table_mask: u64,
    sample_size: u32,
    size: u32,
    use_vector: bool,
}

impl FrequencySketch {
    /// Creates a sketch sized for approximately `capacity` distinct items.
    ///
    /// The table length is the next power of two ≥ `capacity` (floor of 8
    /// so the nibble selection stays meaningful), and the sample size is
    /// `10 × capacity` with a minimum of 10.
    pub fn new(capacity: usize) -> Self {
        let len = ceil_pow2(capacity, 8);
        Self {
            table: vec![0u64; len].into_boxed_slice(),
            table_mask: (len - 1) as u64,
            sample_size: Self::sample_size_for(capacity),
            size: 0,
            use_vector: vector_available(),
        }
    }

    #[inline]
    fn sample_size_for(capacity: usize) -> u32 {
        capacity
            .saturating_mul(10)
            .clamp(10, u32::MAX as usize) as u32
    }

    /// Number of increments recorded since the last reset.
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Number of increments that triggers an aging pass.
    #[inline]
    pub fn sample_size(&self) -> u32 {
        self.sample_size
    }

    /// Re-derives the sample size for a new capacity.
    ///
    /// If the recorded size already meets the new threshold, aging passes
    /// run immediately until it is back under.
    pub fn reset_sample_size(&mut self, capacity: usize) {
        self.sample_size = Self::sample_size_for(capacity);
        while self.size >= self.sample_size {
            self.reset();
        }
    }

    /// Estimated frequency of the key with the given hash, in `0..=15`.
    #[inline]
    pub fn estimate(&self, key_hash: u64) -> u32 {
        let h = spread(fold(key_hash));
        #[cfg(target_arch = "x86_64")]
        if self.use_vector {
            // SAFETY: `use_vector` is only true when AVX2 was detected.
            return unsafe { self.estimate_avx2(h) };
        }
        self.estimate_scalar(h)
    }

    /// Records one access for the key with the given hash.
    ///
    /// Each of the four counters below saturation is bumped. Every call
    /// counts toward the sample, and reaching `sample_size` triggers an
    /// aging pass, so saturated heavy hitters cannot stall aging.
    #[inline]
    pub fn increment(&mut self, key_hash: u64) {
        let h = spread(fold(key_hash));
        #[cfg(target_arch = "x86_64")]
        if self.use_vector {
            // SAFETY: `use_vector` is only true when AVX2 was detected.
            unsafe { self.increment_avx2(h) };
            self.bump_size();
            return;
        }
        self.increment_scalar(h);
        self.bump_size();
    }

    #[inline]
    fn bump_size(&mut self) {
        self.size += 1;
        if self.size >= self.sample_size {
            self.reset();
        }
    }

    /// Halves every counter in one pass and adjusts `size` by the residue
    /// of odd counters, keeping the next sample period accurate.
    pub fn reset(&mut self) {
        let mut odd = 0u32;
        for word in self.table.iter_mut() {
            odd += (*word & ONE_MASK).count_ones();
            *word = (*word >> 1) & RESET_MASK;
        }
        self.size = (self.size.saturating_sub(odd >> 2)) >> 1;
    }

    /// Zeroes the table and the recorded size.
    pub fn clear(&mut self) {
        self.table.iter_mut().for_each(|word| *word = 0);
        self.size = 0;
    }

    // -- scalar path ------------------------------------------------------

    #[inline]
    fn index_of(&self, h: u32, depth: usize) -> usize {
        let mut hash = (h as u64).wrapping_add(SEEDS[depth]).wrapping_mul(SEEDS[depth]);
        hash = hash.wrapping_add(hash >> 32);
        (hash & self.table_mask) as usize
    }

    fn estimate_scalar(&self, h: u32) -> u32 {
        let start = ((h & 3) << 2) as usize;
        let mut min = u32::MAX;
        for depth in 0..4 {
            let index = self.index_of(h, depth);
            let shift = (start + depth) << 2;
            let count = ((self.table[index] >> shift) & 0xF) as u32;
            min = min.min(count);
        }
        min
    }

    fn increment_scalar(&mut self, h: u32) {
        let start = ((h & 3) << 2) as usize;
        for depth in 0..4 {
            let index = self.index_of(h, depth);
            let shift = (start + depth) << 2;
            if (self.table[index] >> shift) & 0xF < 15 {
                self.table[index] += 1u64 << shift;
            }
        }
    }

    // -- AVX2 path --------------------------------------------------------

    #[cfg(target_arch = "x86_64")]
    #[target_feature(enable = "avx2")]
    unsafe fn estimate_avx2(&self, h: u32) -> u32 {
        use std::arch::x86_64::*;

        let start = ((h & 3) << 2) as i64;
        let indexes = _mm256_set_epi64x(
            self.index_of(h, 3) as i64,
            self.index_of(h, 2) as i64,
            self.index_of(h, 1) as i64,
            self.index_of(h, 0) as i64,
        );
        let words = _mm256_i64gather_epi64::<8>(self.table.as_ptr() as *const i64, indexes);
        let shifts = _mm256_set_epi64x(
            (start + 3) << 2,
            (start + 2) << 2,
            (start + 1) << 2,
            start << 2,
        );
        let counters = _mm256_and_si256(_mm256_srlv_epi64(words, shifts), _mm256_set1_epi64x(0xF));

        let mut lanes = [0i64; 4];
        _mm256_storeu_si256(lanes.as_mut_ptr() as *mut __m256i, counters);
        lanes.iter().map(|&lane| lane as u32).min().unwrap_or(0)
    }

    #[cfg(target_arch = "x86_64")]
    #[target_feature(enable = "avx2")]
    unsafe fn increment_avx2(&mut self, h: u32) {
        use std::arch::x86_64::*;

        let start = ((h & 3) << 2) as i64;
        let indexes = _mm256_set_epi64x(
            self.index_of(h, 3) as i64,
            self.index_of(h, 2) as i64,
            self.index_of(h, 1) as i64,
            self.index_of(h, 0) as i64,
        );
        let words = _mm256_i64gather_epi64::<8>(self.table.as_ptr() as *const i64, indexes);
        let shifts = _mm256_set_epi64x(
            (start + 3) << 2,
            (start + 2) << 2,
            (start + 1) << 2,
            start << 2,
        );
        let counters = _mm256_and_si256(_mm256_srlv_epi64(words, shifts), _mm256_set1_epi64x(0xF));
        // All-ones lanes are saturated; mask their increments to zero.
        let saturated = _mm256_cmpeq_epi64(counters, _mm256_set1_epi64x(0xF));
        let increments =
            _mm256_andnot_si256(saturated, _mm256_sllv_epi64(_mm256_set1_epi64x(1), shifts));

        // AVX2 has no scatter; apply the masked increments scalar-wise.
        // Two lanes may hit the same word at different nibbles, and the
        // adds accumulate exactly as in the scalar path.
        let mut index_lanes = [0i64; 4];
        let mut increment_lanes = [0i64; 4];
        _mm256_storeu_si256(index_lanes.as_mut_ptr() as *mut __m256i, indexes);
        _mm256_storeu_si256(increment_lanes.as_mut_ptr() as *mut __m256i, increments);
        for depth in 0..4 {
            if increment_lanes[depth] != 0 {
                self.table[index_lanes[depth] as usize] =
                    self.table[index_lanes[depth] as usize]
                        .wrapping_add(increment_lanes[depth] as u64);
            }
        }
    }

    /// Forces the scalar path; used to verify scalar/vector agreement.
    #[cfg(test)]
    pub(crate) fn disable_vector_path(&mut self) {
        self.use_vector = false;
    }
}

/// Folds a 64-bit key hash into the 32-bit domain the spread mix expects.
#[inline]
fn fold(hash: u64) -> u32 {
    (hash ^ (hash >> 32)) as u32
}

/// Supplemental 32-bit mix compensating for weak key hashes.
#[inline]
fn spread(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x045d_9f3b);
    h ^= h >> 16;
    h = h.wrapping_mul(0x045d_9f3b);
    h ^ (h >> 16)
}

#[inline]
fn vector_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::arch::is_x86_feature_detected!("avx2")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}
