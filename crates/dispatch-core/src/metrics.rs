// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Dispatch counters and their snapshot form.
//!
//! The live counters are plain atomics bumped from the producer, scheduler,
//! shim, and completion threads; [`DispatchStats`] is the coherent-enough
//! snapshot handed to callers for throttling decisions and CLI output.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live atomic counters. One instance per device, updated relaxed — these
/// feed observability, not control flow.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub submitted: AtomicU64,
    pub rejected: AtomicU64,
    pub dispatched: AtomicU64,
    pub completed_batches: AtomicU64,
    pub completed_samples: AtomicU64,
    pub scheduler_idle: AtomicU64,
    pub shim_idle: AtomicU64,
    pub ring_sweeps: AtomicU64,
}

impl Counters {
    pub(crate) fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed_batches: self.completed_batches.load(Ordering::Relaxed),
            completed_samples: self.completed_samples.load(Ordering::Relaxed),
            scheduler_idle: self.scheduler_idle.load(Ordering::Relaxed),
            shim_idle: self.shim_idle.load(Ordering::Relaxed),
            ring_sweeps: self.ring_sweeps.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of one device's dispatch counters.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DispatchStats {
    /// Batches accepted by the admission queue.
    pub submitted: u64,
    /// Batches rejected because the admission queue was full.
    pub rejected: u64,
    /// Batches handed to an enqueue shim.
    pub dispatched: u64,
    /// Batches whose post-processing completed.
    pub completed_batches: u64,
    /// Samples delivered through their callbacks.
    pub completed_samples: u64,
    /// Scheduler idle polls (empty admission queue).
    pub scheduler_idle: u64,
    /// Shim idle polls (empty hand-off cell).
    pub shim_idle: u64,
    /// Full sweeps over every activation ring without a free slot.
    pub ring_sweeps: u64,
}

impl DispatchStats {
    /// Batches admitted but not yet completed.
    pub fn in_system(&self) -> u64 {
        self.submitted.saturating_sub(self.completed_batches)
    }

    /// Fraction of submissions that were rejected, in `[0.0, 1.0]`.
    pub fn rejection_ratio(&self) -> f64 {
        let attempts = self.submitted + self.rejected;
        if attempts == 0 {
            return 0.0;
        }
        self.rejected as f64 / attempts as f64
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        format!(
            "Dispatch: {} submitted ({} rejected, {:.0}% rejection), \
             {} dispatched, {} batches / {} samples completed, \
             idle polls: {} scheduler / {} shim, {} full ring sweeps",
            self.submitted,
            self.rejected,
            self.rejection_ratio() * 100.0,
            self.dispatched,
            self.completed_batches,
            self.completed_samples,
            self.scheduler_idle,
            self.shim_idle,
            self.ring_sweeps,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let c = Counters::default();
        c.submitted.store(10, Ordering::Relaxed);
        c.completed_batches.store(7, Ordering::Relaxed);
        c.completed_samples.store(28, Ordering::Relaxed);

        let s = c.snapshot();
        assert_eq!(s.submitted, 10);
        assert_eq!(s.completed_batches, 7);
        assert_eq!(s.in_system(), 3);
    }

    #[test]
    fn test_rejection_ratio() {
        let s = DispatchStats {
            submitted: 6,
            rejected: 2,
            ..Default::default()
        };
        assert!((s.rejection_ratio() - 0.25).abs() < 1e-9);

        let empty = DispatchStats::default();
        assert_eq!(empty.rejection_ratio(), 0.0);
    }

    #[test]
    fn test_summary_format() {
        let s = DispatchStats {
            submitted: 4,
            rejected: 1,
            dispatched: 4,
            completed_batches: 4,
            completed_samples: 16,
            ..Default::default()
        };
        let out = s.summary();
        assert!(out.contains("4 submitted"));
        assert!(out.contains("16 samples"));
    }
}
