// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! CPU affinity: consuming the caller's CPU list and pinning threads.
//!
//! The caller hands each device an ordered CPU list. It is consumed
//! leaf-first: the last element pins the scheduler, the next `shim_count`
//! elements pin the shim threads, and whatever remains is the driver /
//! initialisation set. With `ringfence_driver` the driver set is exactly
//! that remainder, guaranteeing the vendor driver never shares a core with
//! a shim; without it the driver may roam the whole list.
//!
//! A list shorter than the thread count leaves the overflow threads
//! unpinned rather than failing — a half-pinned device is still correct,
//! just slower.

/// Per-thread CPU assignments for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffinityPlan {
    /// CPU for the scheduler thread, if the list was non-empty.
    pub scheduler: Option<usize>,
    /// One CPU per shim thread; `None` entries run unpinned.
    pub shims: Vec<Option<usize>>,
    /// CPU set for driver and initialisation context; empty means unpinned.
    pub driver: Vec<usize>,
}

impl AffinityPlan {
    /// Consumes `affinities` leaf-first into a per-thread plan.
    pub fn from_list(affinities: &[usize], shim_count: usize, ringfence_driver: bool) -> Self {
        let mut remaining = affinities.to_vec();
        let scheduler = remaining.pop();
        let shims = (0..shim_count).map(|_| remaining.pop()).collect();
        let driver = if ringfence_driver {
            remaining
        } else {
            affinities.to_vec()
        };
        Self {
            scheduler,
            shims,
            driver,
        }
    }
}

/// Pins the calling thread to the given CPU set. An empty set is a no-op.
///
/// Pinning is best-effort: on failure (or on platforms without thread
/// affinity) the thread keeps running unpinned and a warning is logged.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(cpus: &[usize]) {
    if cpus.is_empty() {
        return;
    }
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        for &cpu in cpus {
            libc::CPU_SET(cpu, &mut set);
        }
        let rc = libc::pthread_setaffinity_np(
            libc::pthread_self(),
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        );
        if rc != 0 {
            tracing::warn!(rc, ?cpus, "failed to set CPU affinity");
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(cpus: &[usize]) {
    if !cpus.is_empty() {
        tracing::warn!(?cpus, "CPU affinity not supported on this platform");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_first_consumption() {
        // List [0,1,2,3,4], 2 shims: scheduler=4, shims=[3,2], driver rest.
        let plan = AffinityPlan::from_list(&[0, 1, 2, 3, 4], 2, true);
        assert_eq!(plan.scheduler, Some(4));
        assert_eq!(plan.shims, vec![Some(3), Some(2)]);
        assert_eq!(plan.driver, vec![0, 1]);
    }

    #[test]
    fn test_without_ringfence_driver_roams() {
        let plan = AffinityPlan::from_list(&[0, 1, 2, 3], 1, false);
        assert_eq!(plan.scheduler, Some(3));
        assert_eq!(plan.shims, vec![Some(2)]);
        // Driver may share every listed CPU.
        assert_eq!(plan.driver, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_short_list_leaves_threads_unpinned() {
        let plan = AffinityPlan::from_list(&[7], 2, true);
        assert_eq!(plan.scheduler, Some(7));
        assert_eq!(plan.shims, vec![None, None]);
        assert!(plan.driver.is_empty());
    }

    #[test]
    fn test_empty_list() {
        let plan = AffinityPlan::from_list(&[], 1, false);
        assert_eq!(plan.scheduler, None);
        assert_eq!(plan.shims, vec![None]);
        assert!(plan.driver.is_empty());
    }

    #[test]
    fn test_pin_empty_set_is_noop() {
        // Must not touch the current thread's affinity.
        pin_current_thread(&[]);
    }
}
