//! Bit-twiddling helpers shared by the data-structure primitives.
//!
//! Power-of-two sizing for the ring buffer and sketch tables, plus the
//! 64-bit finalizer mix used for stripe probing and shard selection.

/// Rounds `n` up to the next power of two, with a floor of `min`.
///
/// Used to size mask-indexed tables (ring buffers, sketch tables, index
/// shards) so that `index & (len - 1)` replaces a modulo.
///
/// # Example
///
/// ```
/// use tiercache::ds::bitops::ceil_pow2;
///
/// assert_eq!(ceil_pow2(10, 1), 16);
/// assert_eq!(ceil_pow2(16, 1), 16);
/// assert_eq!(ceil_pow2(0, 8), 8);
/// ```
#[inline]
pub fn ceil_pow2(n: usize, min: usize) -> usize {
    n.max(min).next_power_of_two()
}

/// Finalizer-style 64-bit mix (splitmix64 variant).
///
/// Cheap avalanche for values that are already "mostly random" (thread
/// probe seeds, shard hashes). Not a general-purpose hash.
///
/// # Example
///
/// ```
/// use tiercache::ds::bitops::mix64;
///
/// // Nearby inputs diverge completely
/// assert_ne!(mix64(1), mix64(2));
/// assert_ne!(mix64(1) >> 32, mix64(2) >> 32);
/// ```
#[inline]
pub fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_pow2_rounds_up() {
        assert_eq!(ceil_pow2(1, 1), 1);
        assert_eq!(ceil_pow2(3, 1), 4);
        assert_eq!(ceil_pow2(10, 1), 16);
        assert_eq!(ceil_pow2(1024, 1), 1024);
    }

    #[test]
    fn ceil_pow2_applies_floor() {
        assert_eq!(ceil_pow2(0, 4), 4);
        assert_eq!(ceil_pow2(2, 8), 8);
    }

    #[test]
    fn mix64_is_deterministic() {
        assert_eq!(mix64(42), mix64(42));
    }

    #[test]
    fn mix64_spreads_low_bits() {
        // Sequential inputs should land in different low-bit buckets most of
        // the time; check a small sample is not constant.
        let buckets: std::collections::HashSet<u64> = (0..16).map(|i| mix64(i) & 7).collect();
        assert!(buckets.len() > 1);
    }
}
