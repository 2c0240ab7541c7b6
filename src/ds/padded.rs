//! Cache-line padded atomic fields.
//!
//! Hot counters that are written by different threads must not share a
//! cache line, or every write invalidates the other thread's line and the
//! counters ping-pong between cores. `Padded<T>` forces its contents onto
//! a line of its own; [`PaddedHeadAndTail`] packages the ring buffer's
//! consumer and producer counters on two separate lines.
//!
//! ## Layout
//!
//! ```text
//!   PaddedHeadAndTail
//!   ┌────────────────────────────┬────────────────────────────┐
//!   │ head: AtomicU32  (line 0)  │ tail: AtomicU32  (line 1)  │
//!   │ ...padding to 64 bytes...  │ ...padding to 64 bytes...  │
//!   └────────────────────────────┴────────────────────────────┘
//!   consumer-owned                producers CAS here
//! ```
//!
//! 64 bytes covers the common case; platforms with 128-byte destructive
//! interference (some ARM server parts) still get a correct, if slightly
//! less isolated, layout.

use std::sync::atomic::AtomicU32;

/// Wrapper that aligns (and therefore pads) its contents to a cache line.
///
/// Alignment forces the size up to a multiple of 64 bytes, so consecutive
/// `Padded` fields never share a line.
///
/// # Example
///
/// ```
/// use std::sync::atomic::AtomicU64;
/// use tiercache::ds::padded::Padded;
///
/// let cell = Padded(AtomicU64::new(0));
/// assert_eq!(std::mem::align_of_val(&cell), 64);
/// assert!(std::mem::size_of_val(&cell) >= 64);
/// ```
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct Padded<T>(pub T);

/// Ring-buffer counter pair with `head` and `tail` on distinct cache lines.
///
/// `head` is advanced only by the single consumer; `tail` is CAS-contended
/// by producers. Both are monotonically non-decreasing 32-bit counters;
/// indexing wraps via masking, so overflow is harmless.
#[derive(Debug, Default)]
pub struct PaddedHeadAndTail {
    /// Consumer position. Written by the single consumer only.
    pub head: Padded<AtomicU32>,
    /// Producer position. CAS-incremented by producers.
    pub tail: Padded<AtomicU32>,
}

impl PaddedHeadAndTail {
    /// Creates a counter pair with both positions at zero.
    pub fn new() -> Self {
        Self::default()
    }
}
