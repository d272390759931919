// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fixed pool of payload slots for one activation.

use crate::{Payload, PoolError};
use std::collections::VecDeque;
use std::sync::Mutex;

/// A bounded FIFO pool of free [`Payload`] slots for one activation.
///
/// Capacity equals the activation's `set_size` and is fixed at
/// construction; there is no growth policy. Contenders are the scheduler
/// (acquire) and the completion threads (release), so the mutex is held
/// only across a single push or pop.
pub struct SlotRing {
    activation: usize,
    capacity: usize,
    free: Mutex<VecDeque<Box<Payload>>>,
}

impl SlotRing {
    /// Creates the ring and pre-constructs its `set_size` payload slots.
    pub fn new(device: u32, activation: usize, set_size: usize) -> Self {
        assert!(set_size > 0, "set_size must be > 0");
        let free = (0..set_size)
            .map(|set| Box::new(Payload::new(device, activation, set)))
            .collect();
        Self {
            activation,
            capacity: set_size,
            free: Mutex::new(free),
        }
    }

    /// Checks out a free slot, or returns `None` if the activation is
    /// fully occupied. Non-blocking.
    pub fn acquire(&self) -> Option<Box<Payload>> {
        self.lock_free().pop_front()
    }

    /// Returns a slot to the pool.
    ///
    /// A full ring or a payload belonging to another activation indicates
    /// a double-release bug. The error carries the diagnostic; callers are
    /// expected to treat it as fatal rather than continue with a corrupt
    /// pool.
    pub fn release(&self, payload: Box<Payload>) -> Result<(), PoolError> {
        if payload.activation != self.activation {
            return Err(PoolError::ForeignPayload {
                payload_activation: payload.activation,
                ring_activation: self.activation,
            });
        }
        let mut free = self.lock_free();
        if free.len() >= self.capacity {
            return Err(PoolError::DoubleRelease {
                activation: self.activation,
                capacity: self.capacity,
            });
        }
        free.push_back(payload);
        Ok(())
    }

    /// Number of free slots currently in the ring.
    pub fn free_len(&self) -> usize {
        self.lock_free().len()
    }

    /// The ring's fixed capacity (`set_size`).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Locks the free list, recovering from poison. A panic elsewhere must
    /// not wedge completion-path releases during shutdown.
    fn lock_free(&self) -> std::sync::MutexGuard<'_, VecDeque<Box<Payload>>> {
        self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for SlotRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotRing")
            .field("activation", &self.activation)
            .field("capacity", &self.capacity)
            .field("free", &self.free_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefilled_to_capacity() {
        let ring = SlotRing::new(0, 2, 3);
        assert_eq!(ring.capacity(), 3);
        assert_eq!(ring.free_len(), 3);

        // Slots come out in set order and carry their identity.
        let p0 = ring.acquire().unwrap();
        assert_eq!((p0.device, p0.activation, p0.set), (0, 2, 0));
        let p1 = ring.acquire().unwrap();
        assert_eq!(p1.set, 1);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let ring = SlotRing::new(0, 0, 1);
        let p = ring.acquire().unwrap();
        assert!(ring.acquire().is_none());

        ring.release(p).unwrap();
        assert!(ring.acquire().is_some());
    }

    #[test]
    fn test_release_cycles_fifo() {
        let ring = SlotRing::new(0, 0, 2);
        let a = ring.acquire().unwrap();
        let b = ring.acquire().unwrap();
        ring.release(b).unwrap();
        ring.release(a).unwrap();

        // FIFO: the first released comes back first.
        assert_eq!(ring.acquire().unwrap().set, 1);
        assert_eq!(ring.acquire().unwrap().set, 0);
    }

    #[test]
    fn test_double_release_detected() {
        let ring = SlotRing::new(0, 0, 1);
        let extra = Box::new(Payload::new(0, 0, 0));
        let err = ring.release(extra).unwrap_err();
        assert!(matches!(
            err,
            PoolError::DoubleRelease {
                activation: 0,
                capacity: 1,
            }
        ));
    }

    #[test]
    fn test_wrong_activation_detected() {
        let ring = SlotRing::new(0, 1, 2);
        let p = ring.acquire().unwrap();
        let other = SlotRing::new(0, 4, 2);
        let err = other.release(p).unwrap_err();
        assert!(matches!(
            err,
            PoolError::ForeignPayload {
                payload_activation: 1,
                ring_activation: 4,
            }
        ));
    }
}
