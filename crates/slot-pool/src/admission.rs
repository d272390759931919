// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The bounded admission queue between the producer and the scheduler.
//!
//! A fixed circular slot array indexed by two monotonically increasing
//! counters, `front` (consumer) and `back` (producer), with
//! `back − front ≤ depth` at all times. A full queue rejects the batch and
//! hands it back; neither side ever blocks on the other.
//!
//! # Synchronisation
//!
//! The consumer side belongs to a single scheduler thread and is
//! unsynchronised. The producer side is serialised by an internal mutex so
//! several load-generator threads can submit concurrently; the critical
//! section is one slot write plus a counter store. Slot contents are
//! published by the release store on `back` and re-claimed by the release
//! store on `front`, so no slot is ever read and written concurrently.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Bounded single-consumer admission queue.
///
/// `T` is the batch type; the queue moves values in and out without
/// cloning.
pub struct AdmissionQueue<T> {
    slots: Box<[UnsafeCell<Option<T>>]>,
    /// Consumer counter: next slot to pop. Monotonic, never wraps.
    front: AtomicUsize,
    /// Producer counter: next slot to fill. Monotonic, never wraps.
    back: AtomicUsize,
    depth: usize,
    /// Serialises producers; see module docs.
    producer: Mutex<()>,
}

// Slots are only touched by the producer (under the mutex, on an empty
// slot) or the consumer (on a published slot), never both at once.
unsafe impl<T: Send> Send for AdmissionQueue<T> {}
unsafe impl<T: Send> Sync for AdmissionQueue<T> {}

impl<T> AdmissionQueue<T> {
    /// Creates a queue holding at most `depth` batches.
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "admission queue depth must be > 0");
        let slots = (0..depth).map(|_| UnsafeCell::new(None)).collect();
        Self {
            slots,
            front: AtomicUsize::new(0),
            back: AtomicUsize::new(0),
            depth,
            producer: Mutex::new(()),
        }
    }

    /// Attempts to enqueue a batch.
    ///
    /// On success returns the remaining slack (`depth − occupancy` after
    /// the insert, ≥ 0) so the producer can throttle. When the queue is
    /// full the batch is handed back unchanged in `Err` for the producer to
    /// retry. Never blocks beyond the mutex-protected slot write.
    pub fn try_submit(&self, batch: T) -> Result<usize, T> {
        let _guard = self
            .producer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let back = self.back.load(Ordering::Relaxed);
        let front = self.front.load(Ordering::Acquire);
        if back - front >= self.depth {
            return Err(batch);
        }

        // The slot at `back % depth` is empty: the consumer advanced past
        // it at least `depth` increments ago.
        unsafe {
            *self.slots[back % self.depth].get() = Some(batch);
        }
        self.back.store(back + 1, Ordering::Release);

        Ok(self.depth - (back + 1 - front))
    }

    /// Pops the oldest batch, or `None` if the queue is empty.
    ///
    /// Must only be called from the single consumer thread.
    pub fn try_pop(&self) -> Option<T> {
        let front = self.front.load(Ordering::Relaxed);
        let back = self.back.load(Ordering::Acquire);
        if front == back {
            return None;
        }

        let batch = unsafe { (*self.slots[front % self.depth].get()).take() };
        debug_assert!(batch.is_some(), "published slot was empty");
        self.front.store(front + 1, Ordering::Release);
        batch
    }

    /// Current occupancy. Racy by nature; informational only.
    pub fn len(&self) -> usize {
        let front = self.front.load(Ordering::Acquire);
        let back = self.back.load(Ordering::Acquire);
        back.saturating_sub(front)
    }

    /// Returns `true` if the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The fixed queue depth.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl<T> std::fmt::Debug for AdmissionQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionQueue")
            .field("depth", &self.depth)
            .field("len", &self.len())
            .finish()
    }
}
