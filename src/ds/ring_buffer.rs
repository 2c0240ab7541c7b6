//! Multi-producer / single-consumer bounded ring buffer.
//!
//! Batches read-hit notifications on the cache's hot path: readers enqueue
//! entry references with two atomic operations, and the maintenance owner
//! drains the batch later. Reservation (a CAS on `tail`) is separated from
//! publication (a release store into the slot) so producers never block one
//! another; the consumer tolerates reserved-but-unpublished slots by
//! reporting [`BufferStatus::Contended`] and retrying on the next pass.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │ MpscBoundedBuffer<T>          capacity = power of two, mask = cap-1  │
//!   │                                                                      │
//!   │   counters: PaddedHeadAndTail      (32-bit, monotonic, wrap-safe)    │
//!   │                                                                      │
//!   │   slots: [AtomicPtr<T>; cap]                                         │
//!   │   ┌────┬────┬────┬────┬────┬────┬────┬────┐                          │
//!   │   │ ▓▓ │ ▓▓ │ ∅  │    │    │    │    │    │                          │
//!   │   └────┴────┴────┴────┴────┴────┴────┴────┘                          │
//!   │     ▲         ▲      ▲                                               │
//!   │   head      published│tail (∅ = reserved, store pending)             │
//!   │                                                                      │
//!   │   producer: size = tail - head; Full if size ≥ cap                   │
//!   │             CAS tail → tail+1; Contended on CAS failure              │
//!   │             store item at tail & mask (Release)                      │
//!   │   consumer: Empty if head == tail                                    │
//!   │             load slot (Acquire); null → Contended                    │
//!   │             null the slot, then store head+1 (Release)               │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Operations
//!
//! | Operation  | Caller         | Result                                      |
//! |------------|----------------|---------------------------------------------|
//! | `try_add`  | any producer   | `Success`, `Full`, `Contended`              |
//! | `try_take` | consumer only  | item, or `Empty` / `Contended`              |
//! | `drain_to` | consumer only  | count drained into an output window         |
//! | `clear`    | `&mut` (owner) | drops all published items                   |
//! | `len`      | any            | snapshot                                    |
//!
//! ## Thread Safety
//!
//! Any number of producers may call `try_add`. `try_take` and `drain_to`
//! must only ever be called by one thread at a time (the cache guarantees
//! this by draining inside the maintenance critical section).

use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::ds::bitops::ceil_pow2;
use crate::ds::padded::PaddedHeadAndTail;

/// Outcome of a producer-side [`MpscBoundedBuffer::try_add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    /// The item was enqueued.
    Success,
    /// The buffer is at capacity; the caller should trigger a drain.
    Full,
    /// Another producer won the reservation race; transient, retry later.
    Contended,
}

/// Failure of a consumer-side [`MpscBoundedBuffer::try_take`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeError {
    /// No items are enqueued.
    Empty,
    /// A producer has reserved a slot but not yet published it.
    Contended,
}

/// Lock-free bounded MPSC ring of shared items.
///
/// Items are `Arc`s so that producers keep their own handle while the
/// buffer holds another; slots store the raw `Arc` pointer, with null
/// doubling as the "reserved but unpublished" sentinel.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tiercache::ds::ring_buffer::{BufferStatus, MpscBoundedBuffer};
///
/// let buffer: MpscBoundedBuffer<u64> = MpscBoundedBuffer::new(4);
/// assert_eq!(buffer.try_add(&Arc::new(7)), BufferStatus::Success);
/// assert_eq!(buffer.len(), 1);
///
/// let item = buffer.try_take().unwrap();
/// assert_eq!(*item, 7);
/// assert!(buffer.try_take().is_err());
/// ```
#[derive(Debug)]
pub struct MpscBoundedBuffer<T> {
    slots: Box<[AtomicPtr<T>]>,
    mask: u32,
    counters: PaddedHeadAndTail,
}

// SAFETY: the buffer owns Arc<T> handles behind raw pointers; moving or
// sharing it is safe exactly when sharing Arc<T> across threads is.
unsafe impl<T: Send + Sync> Send for MpscBoundedBuffer<T> {}
unsafe impl<T: Send + Sync> Sync for MpscBoundedBuffer<T> {}

impl<T> MpscBoundedBuffer<T> {
    /// Creates a buffer with at least `capacity` slots.
    ///
    /// The capacity is rounded up to a power of two and clamped to at
    /// least 2 so that the full/empty states stay distinguishable.
    ///
    /// # Example
    ///
    /// ```
    /// use tiercache::ds::ring_buffer::MpscBoundedBuffer;
    ///
    /// let buffer: MpscBoundedBuffer<u64> = MpscBoundedBuffer::new(10);
    /// assert_eq!(buffer.capacity(), 16);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let capacity = ceil_pow2(capacity, 2);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || AtomicPtr::new(std::ptr::null_mut()));
        Self {
            slots: slots.into_boxed_slice(),
            mask: (capacity - 1) as u32,
            counters: PaddedHeadAndTail::new(),
        }
    }

    /// Returns the slot count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns a snapshot of the number of enqueued items.
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.counters.head.0.load(Ordering::Acquire);
        let tail = self.counters.tail.0.load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize
    }

    /// Returns `true` when the snapshot length is zero.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` when the snapshot length is at capacity.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Attempts to enqueue a clone of `item`.
    ///
    /// Reserves a slot by CAS-incrementing `tail`, then publishes the item
    /// with a release store. A lost CAS reports [`BufferStatus::Contended`]
    /// without retrying; the caller's next access will try again.
    pub fn try_add(&self, item: &Arc<T>) -> BufferStatus {
        let head = self.counters.head.0.load(Ordering::Acquire);
        let tail = self.counters.tail.0.load(Ordering::Acquire);
        let size = tail.wrapping_sub(head);

        if size as usize >= self.slots.len() {
            return BufferStatus::Full;
        }

        if self
            .counters
            .tail
            .0
            .compare_exchange(
                tail,
                tail.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            return BufferStatus::Contended;
        }

        let raw = Arc::into_raw(Arc::clone(item)) as *mut T;
        self.slots[(tail & self.mask) as usize].store(raw, Ordering::Release);
        BufferStatus::Success
    }

    /// Dequeues the oldest item. Single consumer only.
    pub fn try_take(&self) -> Result<Arc<T>, TakeError> {
        let head = self.counters.head.0.load(Ordering::Relaxed);
        let tail = self.counters.tail.0.load(Ordering::Acquire);
        if head == tail {
            return Err(TakeError::Empty);
        }

        let slot = &self.slots[(head & self.mask) as usize];
        let raw = slot.load(Ordering::Acquire);
        if raw.is_null() {
            // Reserved by a producer that has not published yet.
            return Err(TakeError::Contended);
        }

        slot.store(std::ptr::null_mut(), Ordering::Relaxed);
        self.counters
            .head
            .0
            .store(head.wrapping_add(1), Ordering::Release);

        // SAFETY: the pointer came from Arc::into_raw in try_add and the
        // slot was nulled above, so this is the only reclamation.
        Ok(unsafe { Arc::from_raw(raw) })
    }

    /// Drains items into `out`, starting at its first vacant position.
    ///
    /// Stops when the buffer is empty, the output window is exhausted, or
    /// an unpublished slot is observed; the new head is published once at
    /// the end. Returns the number of items written. Single consumer only.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use tiercache::ds::ring_buffer::MpscBoundedBuffer;
    ///
    /// let buffer: MpscBoundedBuffer<&str> = MpscBoundedBuffer::new(8);
    /// for item in ["1", "2", "3"] {
    ///     buffer.try_add(&Arc::new(item));
    /// }
    ///
    /// let mut window: Vec<Option<Arc<&str>>> = vec![None; 10];
    /// let drained = buffer.drain_to(&mut window[6..]);
    /// assert_eq!(drained, 3);
    /// assert_eq!(*window[6].take().unwrap(), "1");
    /// assert_eq!(*window[8].take().unwrap(), "3");
    /// assert!(buffer.is_empty());
    /// ```
    pub fn drain_to(&self, out: &mut [Option<Arc<T>>]) -> usize {
        let mut head = self.counters.head.0.load(Ordering::Relaxed);
        let tail = self.counters.tail.0.load(Ordering::Acquire);
        let mut drained = 0;

        while head != tail && drained < out.len() {
            let slot = &self.slots[(head & self.mask) as usize];
            let raw = slot.load(Ordering::Acquire);
            if raw.is_null() {
                break;
            }
            slot.store(std::ptr::null_mut(), Ordering::Relaxed);
            // SAFETY: pointer from Arc::into_raw, slot nulled, single consumer.
            out[drained] = Some(unsafe { Arc::from_raw(raw) });
            drained += 1;
            head = head.wrapping_add(1);
        }

        if drained > 0 {
            self.counters.head.0.store(head, Ordering::Release);
        }
        drained
    }

    /// Drops every published item and resets the counters.
    ///
    /// Takes `&mut self`, so it cannot race with producers or the consumer.
    pub fn clear(&mut self) {
        for slot in self.slots.iter() {
            let raw = slot.swap(std::ptr::null_mut(), Ordering::Relaxed);
            if !raw.is_null() {
                // SAFETY: exclusive access; pointer came from Arc::into_raw.
                unsafe { drop(Arc::from_raw(raw)) };
            }
        }
        self.counters.head.0.store(0, Ordering::Relaxed);
        self.counters.tail.0.store(0, Ordering::Relaxed);
    }
}

impl<T> Drop for MpscBoundedBuffer<T> {
    fn drop(&mut self) {
        self.clear();
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Successful adds minus successful takes always equals `len`.
        #[cfg_attr(miri, ignore)]
        #[test]
        fn prop_accounting_balances(
            capacity in 1usize..64,
            ops in prop::collection::vec(any::<bool>(), 0..200)
        ) {
            let buffer = MpscBoundedBuffer::new(capacity);
            let mut added = 0usize;
            let mut taken = 0usize;

            for add in ops {
                if add {
                    if buffer.try_add(&Arc::new(added as u64)) == BufferStatus::Success {
                        added += 1;
                    }
                } else if buffer.try_take().is_ok() {
                    taken += 1;
                }
                prop_assert_eq!(buffer.len(), added - taken);
            }
        }

        /// Items come out in the order they went in.
        #[cfg_attr(miri, ignore)]
        #[test]
        fn prop_fifo_order(values in prop::collection::vec(any::<u64>(), 1..32)) {
            let buffer = MpscBoundedBuffer::new(values.len());
            for v in &values {
                prop_assert_eq!(buffer.try_add(&Arc::new(*v)), BufferStatus::Success);
            }
            for v in &values {
                prop_assert_eq!(*buffer.try_take().unwrap(), *v);
            }
        }
    }
}
