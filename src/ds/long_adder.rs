//! Striped sum counter for write-heavy, read-rarely statistics.
//!
//! A single shared `AtomicI64` turns into a coherence hot-spot as soon as a
//! few threads increment it on every cache hit. `StripedAdder` spreads the
//! writes across cache-line-padded cells: each thread hashes to a cell via a
//! thread-local probe, and CAS contention triggers either a probe rehash or
//! a growth of the cell array.
//!
//! ## Architecture
//!
//! ```text
//!   ┌────────────────────────────────────────────────────────────────────┐
//!   │ StripedAdder                                                       │
//!   │                                                                    │
//!   │   base: Padded<AtomicI64>      ← fast path while uncontended       │
//!   │                                                                    │
//!   │   cells: RwLock<Box<[Padded<AtomicI64>]>>                          │
//!   │   ┌─────────┬─────────┬─────────┬─────────┐                        │
//!   │   │ cell 0  │ cell 1  │ cell 2  │ cell 3  │  ← grown on contention │
//!   │   └─────────┴─────────┴─────────┴─────────┘                        │
//!   │     thread A  thread B  thread C   (probe = thread-local hash)     │
//!   │                                                                    │
//!   │   sum() = base + Σ cells   (racy snapshot, clamped at zero)        │
//!   └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Operations
//!
//! | Operation   | Cost                         | Notes                     |
//! |-------------|------------------------------|---------------------------|
//! | `increment` | 1 CAS (uncontended)          | Falls back to cell CAS    |
//! | `add`       | 1 CAS (uncontended)          | Grows cells on contention |
//! | `sum`       | O(cells) relaxed loads       | Snapshot, may skew        |
//! | `reset`     | O(cells), excludes writers   |                           |
//!
//! ## Consistency
//!
//! `sum` reads `base` and every cell without fencing between the loads, so
//! the result is a snapshot that may miss concurrent increments. It never
//! reports a negative total. Once all writers have quiesced, `sum` is exact.

use std::cell::Cell;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::ds::bitops::{ceil_pow2, mix64};
use crate::ds::padded::Padded;

/// Source of distinct per-thread probe seeds.
static NEXT_PROBE: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Per-thread stripe probe. Zero means "not yet assigned".
    static PROBE: Cell<u64> = const { Cell::new(0) };
}

#[inline]
fn probe() -> u64 {
    PROBE.with(|p| {
        let mut v = p.get();
        if v == 0 {
            v = mix64(NEXT_PROBE.fetch_add(1, Ordering::Relaxed));
            if v == 0 {
                v = 1;
            }
            p.set(v);
        }
        v
    })
}

/// Rehashes the current thread's probe after CAS contention, moving the
/// thread to a different cell.
#[inline]
fn advance_probe() {
    PROBE.with(|p| {
        let mut v = mix64(p.get());
        if v == 0 {
            v = 1;
        }
        p.set(v);
    });
}

/// Contention-avoiding sum counter.
///
/// # Example
///
/// ```
/// use tiercache::ds::StripedAdder;
///
/// let adder = StripedAdder::new();
/// adder.increment();
/// adder.add(41);
/// assert_eq!(adder.sum(), 42);
///
/// adder.decrement();
/// assert_eq!(adder.sum(), 41);
///
/// adder.reset();
/// assert_eq!(adder.sum(), 0);
/// ```
#[derive(Debug)]
pub struct StripedAdder {
    base: Padded<AtomicI64>,
    cells: RwLock<Box<[Padded<AtomicI64>]>>,
    /// Maximum cell count: next power of two ≥ available parallelism.
    cell_limit: usize,
}

impl StripedAdder {
    /// Creates an adder with no stripes allocated yet.
    ///
    /// Cells are allocated lazily on the first contended add, so a counter
    /// that only ever sees one thread stays a single padded atomic.
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            base: Padded(AtomicI64::new(0)),
            cells: RwLock::new(Box::new([])),
            cell_limit: ceil_pow2(threads, 1),
        }
    }

    /// Adds one to the counter.
    #[inline]
    pub fn increment(&self) {
        self.add(1);
    }

    /// Subtracts one from the counter.
    #[inline]
    pub fn decrement(&self) {
        self.add(-1);
    }

    /// Adds `delta` (which may be negative) to the counter.
    pub fn add(&self, delta: i64) {
        let cells = self.cells.read();
        if cells.is_empty() {
            let base = self.base.0.load(Ordering::Relaxed);
            if self
                .base
                .0
                .compare_exchange(
                    base,
                    base.wrapping_add(delta),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return;
            }
        } else {
            let mask = cells.len() - 1;
            let cell = &cells[(probe() as usize) & mask].0;
            let v = cell.load(Ordering::Relaxed);
            if cell
                .compare_exchange(v, v.wrapping_add(delta), Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            advance_probe();
        }
        drop(cells);
        self.add_contended(delta);
    }

    /// Slow path: retry on another cell, growing the cell array if the
    /// retry also collides.
    #[cold]
    fn add_contended(&self, delta: i64) {
        {
            let cells = self.cells.read();
            if !cells.is_empty() {
                let mask = cells.len() - 1;
                let cell = &cells[(probe() as usize) & mask].0;
                let v = cell.load(Ordering::Relaxed);
                if cell
                    .compare_exchange(
                        v,
                        v.wrapping_add(delta),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    return;
                }
                advance_probe();
            }
        }

        // Writers hold the read lock during their CAS, so the write lock
        // excludes all concurrent adds while the array is copied.
        let mut cells = self.cells.write();
        if cells.len() < self.cell_limit {
            let new_len = (cells.len() * 2).max(2).min(self.cell_limit);
            let mut grown = Vec::with_capacity(new_len);
            for cell in cells.iter() {
                grown.push(Padded(AtomicI64::new(cell.0.load(Ordering::Relaxed))));
            }
            grown.resize_with(new_len, Padded::default);
            *cells = grown.into_boxed_slice();
        }
        let mask = cells.len() - 1;
        cells[(probe() as usize) & mask]
            .0
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Returns a snapshot of the counter.
    ///
    /// The snapshot may skew under concurrent increments but never reports
    /// a negative total.
    ///
    /// # Example
    ///
    /// ```
    /// use tiercache::ds::StripedAdder;
    ///
    /// let adder = StripedAdder::new();
    /// for _ in 0..100 {
    ///     adder.increment();
    /// }
    /// assert_eq!(adder.sum(), 100);
    /// ```
    pub fn sum(&self) -> i64 {
        let mut total = self.base.0.load(Ordering::Relaxed);
        let cells = self.cells.read();
        for cell in cells.iter() {
            total = total.wrapping_add(cell.0.load(Ordering::Relaxed));
        }
        total.max(0)
    }

    /// Zeroes the counter.
    ///
    /// Concurrent adds that race with the reset may land before or after
    /// it; callers that need an exact cut-off must quiesce writers first.
    pub fn reset(&self) {
        let cells = self.cells.write();
        self.base.0.store(0, Ordering::Relaxed);
        for cell in cells.iter() {
            cell.0.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for StripedAdder {
    fn default() -> Self {
        Self::new()
    }
}
