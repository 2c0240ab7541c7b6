//! Time-based expiration policies and the monotonic clock abstraction.
//!
//! An expiry policy decides, per entry, when an item stops being served.
//! The cache consults the policy at three points: when an entry is created,
//! when it is read (`touch`), and when its value is replaced (`update`).
//! During maintenance and trimming, `should_discard` overrides segment
//! routing and forces removal.
//!
//! ## Key Components
//!
//! - [`Clock`] / [`MonotonicClock`] / [`ManualClock`]: tick sources.
//! - [`ExpiryStamp`]: per-entry (written, ttl) pair, published through a
//!   sequence-locked slot so the two words are always read consistently.
//! - [`NoExpiry`]: zero-cost default; nothing ever expires.
//! - [`ExpireAfterWrite`]: stamp set on create and update only.
//! - [`ExpireAfterAccess`]: stamp also refreshed on every read.
//! - [`Expiry`] + [`CustomExpiryPolicy`]: delegate computing a per-event TTL.
//!
//! Combining write-based and access-based expiry is impossible by
//! construction: the cache takes exactly one policy type parameter.
//!
//! ## Ticks
//!
//! Ticks are nanoseconds on a monotonic timeline starting at the clock's
//! creation. [`MonotonicClock`] reads `std::time::Instant`, which maps to
//! `CLOCK_MONOTONIC` on Linux, `mach_absolute_time` on macOS and
//! `QueryPerformanceCounter` on Windows; actual granularity is platform
//! dependent but always well below a millisecond. TTLs are converted once
//! at construction and rejected when zero or when the tick representation
//! would exceed `i64::MAX / 100` (≈ 1067 days), keeping every deadline
//! addition comfortably inside the 64-bit range.
//!
//! ## Example Usage
//!
//! ```
//! use std::time::Duration;
//! use tiercache::policy::expiry::{ExpireAfterWrite, ManualClock};
//!
//! let clock = ManualClock::new();
//! let policy = ExpireAfterWrite::with_clock(Duration::from_millis(200), clock.clone()).unwrap();
//!
//! // Deterministic tests advance the clock by hand.
//! clock.advance(Duration::from_millis(400));
//! ```

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::ConfigError;
use crate::store::entry::Entry;

/// Largest accepted TTL, in ticks (nanoseconds).
pub const MAX_TTL_TICKS: u64 = (i64::MAX / 100) as u64;

/// Converts a TTL to ticks, rejecting unrepresentable values.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tiercache::policy::expiry::ttl_to_ticks;
///
/// assert_eq!(ttl_to_ticks(Duration::from_micros(5)).unwrap(), 5_000);
/// assert!(ttl_to_ticks(Duration::ZERO).is_err());
/// assert!(ttl_to_ticks(Duration::from_secs(u64::MAX)).is_err());
/// ```
pub fn ttl_to_ticks(ttl: Duration) -> Result<u64, ConfigError> {
    if ttl.is_zero() {
        return Err(ConfigError::new("ttl must be greater than zero"));
    }
    let nanos = ttl.as_nanos();
    if nanos > MAX_TTL_TICKS as u128 {
        return Err(ConfigError::new(format!(
            "ttl of {nanos} ns exceeds the maximum representable {MAX_TTL_TICKS} ticks"
        )));
    }
    Ok(nanos as u64)
}

// ---------------------------------------------------------------------------
// Clocks
// ---------------------------------------------------------------------------

/// Monotonic tick source.
pub trait Clock: Send + Sync {
    /// Nanoseconds elapsed on this clock's timeline. Never decreases.
    fn ticks(&self) -> u64;
}

/// Wall-time-independent clock backed by `std::time::Instant`.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Creates a clock whose timeline starts now.
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn ticks(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Hand-driven clock for deterministic expiry tests.
///
/// Clones share the same timeline, so a test can keep one handle while the
/// policy under test owns another.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tiercache::policy::expiry::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let handle = clock.clone();
/// clock.advance(Duration::from_millis(3));
/// assert_eq!(handle.ticks(), 3_000_000);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Creates a clock at tick zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.now
            .fetch_add(delta.as_nanos() as u64, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn ticks(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// ExpiryStamp
// ---------------------------------------------------------------------------

/// Per-entry expiration state: when the deadline was (re)armed and for how
/// long. Two words, always published together through the entry's
/// sequence-locked slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryStamp {
    /// Tick at which the stamp was written.
    pub written: u64,
    /// Lifetime in ticks from `written`.
    pub ttl: u64,
}

impl ExpiryStamp {
    /// Stamp for entries that never expire.
    #[inline]
    pub fn never() -> Self {
        Self { written: 0, ttl: u64::MAX }
    }

    /// Returns `true` once `now` has moved `ttl` or more ticks past the
    /// stamp.
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.written) >= self.ttl
    }

    /// Remaining lifetime at `now`, as a `Duration`.
    #[inline]
    pub fn remaining(&self, now: u64) -> Duration {
        Duration::from_nanos(self.ttl.saturating_sub(now.saturating_sub(self.written)))
    }
}

// ---------------------------------------------------------------------------
// Policy contract
// ---------------------------------------------------------------------------

/// Per-item expiration hooks consumed by the cache.
///
/// `create_item` builds the entry with its initial stamp; `touch` runs on
/// read hits, `update` when a value is replaced; `should_discard` overrides
/// segment routing during maintenance. `can_discard` lets the cache skip
/// expiry checks entirely for policies that never discard.
pub trait ExpiryPolicy<K, V>: Send + Sync {
    /// Builds a new entry carrying this policy's initial stamp.
    fn create_item(&self, key: K, value: Arc<V>) -> Entry<K, V>;

    /// Records a read of `entry`.
    fn touch(&self, entry: &Entry<K, V>);

    /// Records a value replacement on `entry`.
    fn update(&self, entry: &Entry<K, V>);

    /// Returns `true` when `entry` must be removed regardless of its
    /// access history.
    fn should_discard(&self, entry: &Entry<K, V>) -> bool;

    /// Returns `true` when this policy can ever discard an entry.
    fn can_discard(&self) -> bool;
}

/// Policy for caches without time-based expiration. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExpiry;

impl<K: Hash, V> ExpiryPolicy<K, V> for NoExpiry {
    #[inline]
    fn create_item(&self, key: K, value: Arc<V>) -> Entry<K, V> {
        Entry::new(key, value, ExpiryStamp::never())
    }

    #[inline]
    fn touch(&self, _entry: &Entry<K, V>) {}

    #[inline]
    fn update(&self, _entry: &Entry<K, V>) {}

    #[inline]
    fn should_discard(&self, _entry: &Entry<K, V>) -> bool {
        false
    }

    #[inline]
    fn can_discard(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// ExpireAfterWrite
// ---------------------------------------------------------------------------

/// Expires entries a fixed time after they were created or last updated.
///
/// Reads do not extend the lifetime.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tiercache::policy::expiry::ExpireAfterWrite;
///
/// let policy = ExpireAfterWrite::new(Duration::from_secs(30)).unwrap();
/// assert!(ExpireAfterWrite::new(Duration::ZERO).is_err());
/// # let _ = policy;
/// ```
#[derive(Debug, Clone)]
pub struct ExpireAfterWrite<C = MonotonicClock> {
    clock: C,
    ttl: u64,
}

impl ExpireAfterWrite<MonotonicClock> {
    /// Creates the policy with a fresh monotonic clock.
    pub fn new(ttl: Duration) -> Result<Self, ConfigError> {
        Self::with_clock(ttl, MonotonicClock::new())
    }
}

impl<C: Clock> ExpireAfterWrite<C> {
    /// Creates the policy over a caller-provided clock.
    pub fn with_clock(ttl: Duration, clock: C) -> Result<Self, ConfigError> {
        Ok(Self { clock, ttl: ttl_to_ticks(ttl)? })
    }
}

impl<K: Hash, V, C: Clock> ExpiryPolicy<K, V> for ExpireAfterWrite<C> {
    fn create_item(&self, key: K, value: Arc<V>) -> Entry<K, V> {
        let stamp = ExpiryStamp { written: self.clock.ticks(), ttl: self.ttl };
        Entry::new(key, value, stamp)
    }

    #[inline]
    fn touch(&self, _entry: &Entry<K, V>) {}

    fn update(&self, entry: &Entry<K, V>) {
        entry.set_stamp(ExpiryStamp { written: self.clock.ticks(), ttl: self.ttl });
    }

    fn should_discard(&self, entry: &Entry<K, V>) -> bool {
        entry.stamp().is_expired(self.clock.ticks())
    }

    #[inline]
    fn can_discard(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// ExpireAfterAccess
// ---------------------------------------------------------------------------

/// Expires entries a fixed time after their last read or write.
///
/// Every hit re-arms the deadline, so hot entries survive indefinitely.
#[derive(Debug, Clone)]
pub struct ExpireAfterAccess<C = MonotonicClock> {
    clock: C,
    ttl: u64,
}

impl ExpireAfterAccess<MonotonicClock> {
    /// Creates the policy with a fresh monotonic clock.
    pub fn new(ttl: Duration) -> Result<Self, ConfigError> {
        Self::with_clock(ttl, MonotonicClock::new())
    }
}

impl<C: Clock> ExpireAfterAccess<C> {
    /// Creates the policy over a caller-provided clock.
    pub fn with_clock(ttl: Duration, clock: C) -> Result<Self, ConfigError> {
        Ok(Self { clock, ttl: ttl_to_ticks(ttl)? })
    }
}

impl<K: Hash, V, C: Clock> ExpiryPolicy<K, V> for ExpireAfterAccess<C> {
    fn create_item(&self, key: K, value: Arc<V>) -> Entry<K, V> {
        let stamp = ExpiryStamp { written: self.clock.ticks(), ttl: self.ttl };
        Entry::new(key, value, stamp)
    }

    fn touch(&self, entry: &Entry<K, V>) {
        entry.set_stamp(ExpiryStamp { written: self.clock.ticks(), ttl: self.ttl });
    }

    fn update(&self, entry: &Entry<K, V>) {
        entry.set_stamp(ExpiryStamp { written: self.clock.ticks(), ttl: self.ttl });
    }

    fn should_discard(&self, entry: &Entry<K, V>) -> bool {
        entry.stamp().is_expired(self.clock.ticks())
    }

    #[inline]
    fn can_discard(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Custom expiry
// ---------------------------------------------------------------------------

/// Delegate computing a per-event TTL for [`CustomExpiryPolicy`].
///
/// Each hook receives the current remaining TTL and may return it unchanged
/// to leave the deadline untouched relative to the event.
pub trait Expiry<K, V>: Send + Sync {
    /// Lifetime for a freshly created entry.
    fn ttl_on_create(&self, key: &K, value: &V) -> Duration;

    /// Lifetime after a read. Defaults to the current TTL.
    fn ttl_on_read(&self, _key: &K, _value: &V, current: Duration) -> Duration {
        current
    }

    /// Lifetime after a value replacement. Defaults to the create TTL.
    fn ttl_on_update(&self, key: &K, value: &V, _current: Duration) -> Duration {
        self.ttl_on_create(key, value)
    }
}

/// Expiration driven by an [`Expiry`] delegate.
///
/// Per-event TTLs cannot be validated at construction, so out-of-range
/// results are clamped into `[0, MAX_TTL_TICKS]` at the event site; a zero
/// TTL makes the entry immediately discardable.
#[derive(Debug, Clone)]
pub struct CustomExpiryPolicy<E, C = MonotonicClock> {
    calc: E,
    clock: C,
}

impl<E> CustomExpiryPolicy<E, MonotonicClock> {
    /// Creates the policy with a fresh monotonic clock.
    pub fn new(calc: E) -> Self {
        Self { calc, clock: MonotonicClock::new() }
    }
}

impl<E, C: Clock> CustomExpiryPolicy<E, C> {
    /// Creates the policy over a caller-provided clock.
    pub fn with_clock(calc: E, clock: C) -> Self {
        Self { calc, clock }
    }

    #[inline]
    fn clamp_ticks(ttl: Duration) -> u64 {
        ttl.as_nanos().min(MAX_TTL_TICKS as u128) as u64
    }
}

impl<K, V, E, C> ExpiryPolicy<K, V> for CustomExpiryPolicy<E, C>
where
    K: Hash,
    E: Expiry<K, V>,
    C: Clock,
{
    fn create_item(&self, key: K, value: Arc<V>) -> Entry<K, V> {
        let ttl = Self::clamp_ticks(self.calc.ttl_on_create(&key, value.as_ref()));
        let stamp = ExpiryStamp { written: self.clock.ticks(), ttl };
        Entry::new(key, value, stamp)
    }

    fn touch(&self, entry: &Entry<K, V>) {
        let now = self.clock.ticks();
        let current = entry.stamp().remaining(now);
        let value = entry.value();
        let ttl = Self::clamp_ticks(self.calc.ttl_on_read(entry.key(), value.as_ref(), current));
        entry.set_stamp(ExpiryStamp { written: now, ttl });
    }

    fn update(&self, entry: &Entry<K, V>) {
        let now = self.clock.ticks();
        let current = entry.stamp().remaining(now);
        let value = entry.value();
        let ttl = Self::clamp_ticks(self.calc.ttl_on_update(entry.key(), value.as_ref(), current));
        entry.set_stamp(ExpiryStamp { written: now, ttl });
    }

    fn should_discard(&self, entry: &Entry<K, V>) -> bool {
        entry.stamp().is_expired(self.clock.ticks())
    }

    #[inline]
    fn can_discard(&self) -> bool {
        true
    }
}
