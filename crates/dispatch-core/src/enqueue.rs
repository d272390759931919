// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Enqueue strategies: how ready payloads reach the shim body.
//!
//! The shim body (configure inputs, then issue to hardware or loop back)
//! lives on [`DeviceShared`]; what varies is where it runs:
//!
//! - [`InlineEnqueue`] (`shim_count = 0`) — the scheduler thread runs the
//!   body directly. Minimum latency; the scheduler pays the configure cost.
//! - [`ThreadedEnqueue`] (`shim_count ≥ 1`) — pinned worker threads, each
//!   owning a single-slot hand-off cell. Configuring a high-resolution
//!   batch can cost tens of microseconds; moving it off the scheduler
//!   thread keeps admission latency flat.
//!
//! # Hand-off Cells
//!
//! A cell is an `AtomicPtr<Payload>`: null means empty. Only the scheduler
//! stores into a cell, and only when it reads null; only the owning shim
//! clears it, after the payload is fully processed — so a busy shim
//! back-pressures the scheduler by simply not clearing its cell. Ownership
//! of the boxed payload rides the pointer via `Box::into_raw` /
//! `Box::from_raw`, published by the release store and claimed by the
//! acquire load.

use crate::device::{idle_wait, DeviceShared};
use crate::{affinity, DeviceError};
use slot_pool::Payload;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Hands ready payloads to the shim body.
pub(crate) trait Enqueue: Send + Sync {
    /// Forwards one payload. May block briefly (threaded strategy spins
    /// while every cell is full) but never loses the payload.
    fn dispatch(&self, payload: Box<Payload>);

    /// Stops any worker threads. Called after the scheduler has exited, so
    /// no further `dispatch` can race it.
    fn shutdown(&self);
}

/// `shim_count = 0`: the scheduler runs the shim body in place.
pub(crate) struct InlineEnqueue {
    shared: Arc<DeviceShared>,
}

impl InlineEnqueue {
    pub(crate) fn new(shared: Arc<DeviceShared>) -> Self {
        Self { shared }
    }
}

impl Enqueue for InlineEnqueue {
    fn dispatch(&self, payload: Box<Payload>) {
        self.shared.process_payload(payload);
    }

    fn shutdown(&self) {}
}

/// One single-payload hand-off cell; null when empty.
struct HandoffCell(AtomicPtr<Payload>);

impl HandoffCell {
    fn new() -> Self {
        Self(AtomicPtr::new(std::ptr::null_mut()))
    }
}

/// `shim_count ≥ 1`: pinned workers behind hand-off cells.
pub(crate) struct ThreadedEnqueue {
    shared: Arc<DeviceShared>,
    cells: Arc<Vec<HandoffCell>>,
    /// Next cell to try; persists across dispatches.
    round_robin: AtomicUsize,
    terminate: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadedEnqueue {
    /// Spawns one pinned shim thread per entry in `cpus`.
    pub(crate) fn spawn(
        shared: Arc<DeviceShared>,
        cpus: Vec<Option<usize>>,
    ) -> Result<Self, DeviceError> {
        let cells: Arc<Vec<HandoffCell>> =
            Arc::new((0..cpus.len()).map(|_| HandoffCell::new()).collect());
        let terminate = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(cpus.len());
        for (id, cpu) in cpus.into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            let cells = Arc::clone(&cells);
            let terminate = Arc::clone(&terminate);
            let handle = std::thread::Builder::new()
                .name(format!("device-{}-shim-{id}", shared.hw_id))
                .spawn(move || shim_loop(id, cpu, shared, cells, terminate))
                .map_err(|e| DeviceError::Spawn {
                    name: "enqueue-shim",
                    source: e,
                })?;
            workers.push(handle);
        }

        Ok(Self {
            shared,
            cells,
            round_robin: AtomicUsize::new(0),
            terminate,
            workers: Mutex::new(workers),
        })
    }
}

impl Enqueue for ThreadedEnqueue {
    fn dispatch(&self, payload: Box<Payload>) {
        let cell_count = self.cells.len();
        let ptr = Box::into_raw(payload);
        // Only the scheduler thread writes cells, so a null check followed
        // by a plain store cannot race another writer.
        let mut index = self.round_robin.load(Ordering::Relaxed);
        loop {
            for _ in 0..cell_count {
                let cell = &self.cells[index];
                if cell.0.load(Ordering::Acquire).is_null() {
                    cell.0.store(ptr, Ordering::Release);
                    self.round_robin
                        .store((index + 1) % cell_count, Ordering::Relaxed);
                    return;
                }
                index = (index + 1) % cell_count;
            }
            // Every shim is busy; their cells are the back-pressure.
            std::thread::sleep(Duration::from_micros(1));
        }
    }

    fn shutdown(&self) {
        self.terminate.store(true, Ordering::Release);
        let workers = {
            let mut guard = self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!(hw_id = self.shared.hw_id, "shim thread panicked");
            }
        }
        // Shims drain their cells before exiting; anything left behind
        // means a shim died early. Recycle it so shutdown cannot hang on
        // the in-flight counter.
        for cell in self.cells.iter() {
            let ptr = cell.0.swap(std::ptr::null_mut(), Ordering::AcqRel);
            if !ptr.is_null() {
                tracing::error!(hw_id = self.shared.hw_id, "payload abandoned in hand-off cell");
                self.shared.recycle(unsafe { Box::from_raw(ptr) });
            }
        }
    }
}

impl Drop for ThreadedEnqueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker body: spin on the owned cell, process, clear.
fn shim_loop(
    id: usize,
    cpu: Option<usize>,
    shared: Arc<DeviceShared>,
    cells: Arc<Vec<HandoffCell>>,
    terminate: Arc<AtomicBool>,
) {
    if let Some(cpu) = cpu {
        affinity::pin_current_thread(&[cpu]);
    }
    tracing::debug!(hw_id = shared.hw_id, id, ?cpu, "enqueue shim running");

    let yield_us = shared.config.enqueue_yield_time_us;
    let cell = &cells[id];
    loop {
        let ptr = cell.0.load(Ordering::Acquire);
        if !ptr.is_null() {
            let payload = unsafe { Box::from_raw(ptr) };
            shared.process_payload(payload);
            cell.0.store(std::ptr::null_mut(), Ordering::Release);
        } else if terminate.load(Ordering::Acquire) {
            break;
        } else {
            shared.metrics.shim_idle.fetch_add(1, Ordering::Relaxed);
            idle_wait(yield_us);
        }
    }
    tracing::debug!(hw_id = shared.hw_id, id, "enqueue shim terminating");
}
