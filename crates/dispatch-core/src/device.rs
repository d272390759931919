// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The per-device orchestrator: construction, scheduling, completion, and
//! shutdown.
//!
//! One [`Device`] drives one accelerator. Construction builds the whole
//! pipeline bottom-up — backend session, buffer tables, payload rings,
//! admission queue, enqueue strategy, scheduler thread — and pins each
//! thread from the caller's affinity list. After that the moving parts are:
//!
//! ```text
//! producer ──inference──► AdmissionQueue ──► scheduler ──► enqueue shim
//!                                                │ round-robin   │
//!                                          SlotRing[a]      backend.run
//!                                                ▲               │
//!                                                └── completion ◄┘
//! ```
//!
//! # Shutdown
//!
//! `shutdown` (also run by `Drop`, idempotently) moves the device to
//! *Draining*: no new admissions, the scheduler keeps dispatching until the
//! queue is empty, shims finish in-hand payloads, and the call returns once
//! every in-flight payload has completed. A faulted device instead discards
//! undispatched batches and keeps the fault for [`Device::fault`].

use crate::enqueue::{Enqueue, InlineEnqueue, ThreadedEnqueue};
use crate::{affinity, AffinityPlan, Counters, DeviceConfig, DeviceError, DispatchStats, InputMode, SubmitError};
use device_api::{
    Batch, CompletionHandler, CompletionKind, DataSource, DeviceBackend, DeviceBuffer,
    ModelAdapter,
};
use slot_pool::{AdmissionQueue, Payload, SlotRing};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

/// Lifecycle state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Accepting submissions.
    Running,
    /// Terminate flag raised; existing work drains, new work is refused.
    Draining,
    /// A fatal fault latched; remaining work is discarded.
    Failed,
}

impl DeviceState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => DeviceState::Running,
            1 => DeviceState::Draining,
            _ => DeviceState::Failed,
        }
    }
}

/// State shared by the scheduler, shim, and completion threads.
pub(crate) struct DeviceShared {
    pub(crate) config: DeviceConfig,
    pub(crate) hw_id: u32,
    adapter: Arc<dyn ModelAdapter>,
    source: Arc<dyn DataSource>,
    backend: Arc<dyn DeviceBackend>,
    /// `[activation][set] → per-port input buffers`.
    buffers_in: Vec<Vec<Vec<DeviceBuffer>>>,
    /// `[activation][set] → per-port output buffers`.
    buffers_out: Vec<Vec<Vec<DeviceBuffer>>>,
    pub(crate) rings: Vec<SlotRing>,
    pub(crate) admission: AdmissionQueue<Batch>,
    state: AtomicU8,
    pub(crate) terminate: AtomicBool,
    fault: Mutex<Option<DeviceError>>,
    /// Payloads between slot checkout and slot release, guarded for the
    /// shutdown condvar.
    inflight: Mutex<usize>,
    idle: Condvar,
    pub(crate) metrics: Counters,
}

impl DeviceShared {
    pub(crate) fn state(&self) -> DeviceState {
        DeviceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn failed(&self) -> bool {
        self.state() == DeviceState::Failed
    }

    /// Latches the first fatal fault and stops the pipeline.
    pub(crate) fn fail(&self, error: DeviceError) {
        tracing::error!(hw_id = self.hw_id, %error, "device fault");
        {
            let mut fault = lock(&self.fault);
            if fault.is_none() {
                *fault = Some(error);
            }
        }
        self.state.store(DeviceState::Failed as u8, Ordering::Release);
        self.terminate.store(true, Ordering::Release);
    }

    /// The enqueue shim body: configure inputs, then issue or loop back.
    pub(crate) fn process_payload(&self, payload: Box<Payload>) {
        if self.failed() {
            self.recycle(payload);
            return;
        }

        let (a, s) = (payload.activation, payload.set);
        match self.config.input_select {
            InputMode::Normal => {
                if let Err(e) = self.adapter.configure_workload(
                    self.source.as_ref(),
                    &payload.samples,
                    &self.buffers_in[a][s],
                ) {
                    self.fail(DeviceError::Adapter(e));
                    self.recycle(payload);
                    return;
                }
            }
            InputMode::Reserved => {
                self.fail(DeviceError::ReservedInputSelect);
                self.recycle(payload);
                return;
            }
            InputMode::Random => {}
        }

        if self.config.loopback {
            // No hardware run: mirror input port i to output port i so the
            // completion path reads the bytes this workload configured.
            let inputs = &self.buffers_in[a][s];
            let outputs = &self.buffers_out[a][s];
            for (src, dst) in inputs.iter().zip(outputs.iter()) {
                let n = src.len().min(dst.len());
                let bytes = src.to_vec();
                dst.write(0, &bytes[..n]);
            }
            self.complete(payload);
            return;
        }

        match self.backend.run(a, s, payload) {
            Ok(()) => {}
            Err(rejected) => {
                self.fail(DeviceError::BackendRun(rejected.error));
                match rejected.ctx.downcast::<Payload>() {
                    Ok(payload) => self.recycle(payload),
                    Err(_) => panic!("backend returned a foreign context from run"),
                }
            }
        }
    }

    /// The completion dispatcher: post-process, fire callbacks, recycle.
    pub(crate) fn complete(&self, mut payload: Box<Payload>) {
        let samples = std::mem::take(&mut payload.samples);
        let (a, s) = (payload.activation, payload.set);

        match self
            .adapter
            .postprocess_results(&samples, &self.buffers_out[a][s])
        {
            Ok(()) => {
                self.metrics.completed_batches.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .completed_samples
                    .fetch_add(samples.len() as u64, Ordering::Relaxed);
            }
            Err(e) => self.fail(DeviceError::Adapter(e)),
        }

        self.release_slot(payload);
    }

    /// Returns a slot without firing callbacks (fault path).
    pub(crate) fn recycle(&self, mut payload: Box<Payload>) {
        payload.samples.clear();
        self.release_slot(payload);
    }

    /// A release the ring refuses means slot accounting is corrupt;
    /// continuing would double-dispatch hardware slots, so fail loudly.
    fn release_slot(&self, payload: Box<Payload>) {
        let activation = payload.activation;
        self.rings[activation]
            .release(payload)
            .unwrap_or_else(|e| panic!("device {} slot accounting corrupted: {e}", self.hw_id));
        self.inflight_dec();
    }

    pub(crate) fn inflight_inc(&self) {
        *lock(&self.inflight) += 1;
    }

    fn inflight_dec(&self) {
        let mut inflight = lock(&self.inflight);
        debug_assert!(*inflight > 0, "in-flight counter underflow");
        *inflight -= 1;
        if *inflight == 0 {
            self.idle.notify_all();
        }
    }

    /// Blocks until no payload is between checkout and release.
    fn wait_idle(&self) {
        let mut inflight = lock(&self.inflight);
        while *inflight > 0 {
            inflight = self
                .idle
                .wait(inflight)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

/// Locks a mutex, recovering from poison: a panicked worker must not wedge
/// the completion and shutdown paths.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sleeps for `us` microseconds, or spins once when `us` is zero.
pub(crate) fn idle_wait(us: u64) {
    if us == 0 {
        std::hint::spin_loop();
    } else {
        std::thread::sleep(Duration::from_micros(us));
    }
}

/// Builds the completion handler installed into the backend.
///
/// The handler must exist before the shared state does (the backend wants
/// it at `init`), so it closes over a late-bound `Weak` holder that
/// construction fills in once the pipeline is assembled. The `Weak` also
/// keeps the backend → handler → device chain from forming an `Arc` cycle.
fn completion_handler(holder: Arc<OnceLock<Weak<DeviceShared>>>) -> CompletionHandler {
    Arc::new(move |kind, ctx| {
        if kind != CompletionKind::DeviceComplete {
            return;
        }
        let Some(shared) = holder.get().and_then(Weak::upgrade) else {
            tracing::warn!("completion event after device teardown; dropping");
            return;
        };
        match ctx.downcast::<Payload>() {
            Ok(payload) => shared.complete(payload),
            Err(_) => panic!("completion context was not a payload slot"),
        }
    })
}

/// The scheduler thread body.
///
/// Pops batches in FIFO order and assigns each to the next activation by
/// round-robin, waiting for a free payload slot when every ring is empty.
/// The round-robin index persists across batches. On terminate the loop
/// drains the admission queue before exiting; on fault it discards batches
/// instead.
fn scheduler_loop(shared: Arc<DeviceShared>, enqueue: Arc<dyn Enqueue>, cpu: Option<usize>) {
    if let Some(cpu) = cpu {
        affinity::pin_current_thread(&[cpu]);
    }
    tracing::debug!(hw_id = shared.hw_id, ?cpu, "scheduler running");

    let yield_us = shared.config.scheduler_yield_time_us;
    let activation_count = shared.config.activation_count;
    let mut activation = activation_count - 1;

    loop {
        let Some(batch) = shared.admission.try_pop() else {
            if shared.terminate.load(Ordering::Acquire) {
                break;
            }
            shared.metrics.scheduler_idle.fetch_add(1, Ordering::Relaxed);
            idle_wait(yield_us);
            continue;
        };

        if shared.failed() {
            // Discard without callbacks; the fault is already latched.
            drop(batch);
            continue;
        }

        let mut misses = 0usize;
        let payload = loop {
            if shared.failed() {
                break None;
            }
            activation = (activation + 1) % activation_count;
            if let Some(p) = shared.rings[activation].acquire() {
                break Some(p);
            }
            misses += 1;
            if misses % activation_count == 0 {
                shared.metrics.ring_sweeps.fetch_add(1, Ordering::Relaxed);
                idle_wait(yield_us);
            }
        };
        let Some(mut payload) = payload else {
            continue;
        };

        payload.samples = batch;
        shared.inflight_inc();
        shared.metrics.dispatched.fetch_add(1, Ordering::Relaxed);
        enqueue.dispatch(payload);
    }

    tracing::debug!(hw_id = shared.hw_id, "scheduler terminating");
}

/// One accelerator's dispatch pipeline.
pub struct Device {
    shared: Arc<DeviceShared>,
    enqueue: Arc<dyn Enqueue>,
    scheduler: Option<JoinHandle<()>>,
}

impl Device {
    /// Builds and starts the device.
    ///
    /// Initialises the backend session on a thread pinned to the driver CPU
    /// set, enumerates every `(activation, set, port)` buffer, builds one
    /// payload ring per activation, sizes the admission queue, and spawns
    /// the pinned scheduler and shim threads. The affinity list is consumed
    /// leaf-first (see [`AffinityPlan`]).
    pub fn construct(
        adapter: Arc<dyn ModelAdapter>,
        source: Arc<dyn DataSource>,
        config: DeviceConfig,
        hw_id: u32,
        affinities: Vec<usize>,
        backend: Arc<dyn DeviceBackend>,
    ) -> Result<Self, DeviceError> {
        config.validate()?;
        if config.input_select == InputMode::Reserved {
            tracing::warn!(
                hw_id,
                "input_select 'reserved' is unsupported; the first dispatch will fault"
            );
        }

        let plan = AffinityPlan::from_list(&affinities, config.shim_count, config.ringfence_driver);
        tracing::info!(
            hw_id,
            activations = config.activation_count,
            set_size = config.set_size,
            shims = config.shim_count,
            loopback = config.loopback,
            ?plan,
            "constructing device"
        );

        // The handler goes to backend.init before the shared state exists;
        // it resolves the device through this late-bound holder.
        let holder: Arc<OnceLock<Weak<DeviceShared>>> = Arc::new(OnceLock::new());
        let completion = completion_handler(Arc::clone(&holder));

        // Initialise the hardware session from the driver CPU set.
        let options = config.backend_options();
        let init_backend = Arc::clone(&backend);
        let driver_cpus = plan.driver.clone();
        let init = std::thread::Builder::new()
            .name(format!("device-{hw_id}-init"))
            .spawn(move || {
                affinity::pin_current_thread(&driver_cpus);
                init_backend.init(hw_id, &options, completion)
            })
            .map_err(|e| DeviceError::Spawn {
                name: "device-init",
                source: e,
            })?;
        init.join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            .map_err(DeviceError::BackendInit)?;

        // Hold references to every pre-bound buffer, inputs then outputs.
        let in_count = adapter.input_count();
        let out_count = adapter.output_count();
        let mut buffers_in = Vec::with_capacity(config.activation_count);
        let mut buffers_out = Vec::with_capacity(config.activation_count);
        for a in 0..config.activation_count {
            let mut sets_in = Vec::with_capacity(config.set_size);
            let mut sets_out = Vec::with_capacity(config.set_size);
            for s in 0..config.set_size {
                let ins = (0..in_count)
                    .map(|p| backend.buffer(a, s, p))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(DeviceError::BackendInit)?;
                let outs = (0..out_count)
                    .map(|p| backend.buffer(a, s, in_count + p))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(DeviceError::BackendInit)?;
                sets_in.push(ins);
                sets_out.push(outs);
            }
            buffers_in.push(sets_in);
            buffers_out.push(sets_out);
        }

        let rings = (0..config.activation_count)
            .map(|a| SlotRing::new(hw_id, a, config.set_size))
            .collect();

        let shared = Arc::new(DeviceShared {
            admission: AdmissionQueue::new(config.samples_queue_depth),
            hw_id,
            adapter,
            source,
            backend,
            buffers_in,
            buffers_out,
            rings,
            state: AtomicU8::new(DeviceState::Running as u8),
            terminate: AtomicBool::new(false),
            fault: Mutex::new(None),
            inflight: Mutex::new(0),
            idle: Condvar::new(),
            metrics: Counters::default(),
            config,
        });
        holder
            .set(Arc::downgrade(&shared))
            .expect("completion holder set twice");

        let enqueue: Arc<dyn Enqueue> = if shared.config.shim_count == 0 {
            Arc::new(InlineEnqueue::new(Arc::clone(&shared)))
        } else {
            Arc::new(ThreadedEnqueue::spawn(
                Arc::clone(&shared),
                plan.shims.clone(),
            )?)
        };

        let sched_shared = Arc::clone(&shared);
        let sched_enqueue = Arc::clone(&enqueue);
        let sched_cpu = plan.scheduler;
        let scheduler = std::thread::Builder::new()
            .name(format!("device-{hw_id}-sched"))
            .spawn(move || scheduler_loop(sched_shared, sched_enqueue, sched_cpu))
            .map_err(|e| DeviceError::Spawn {
                name: "scheduler",
                source: e,
            })?;

        Ok(Self {
            shared,
            enqueue,
            scheduler: Some(scheduler),
        })
    }

    /// Submits a batch of exactly `model_batch_size` samples.
    ///
    /// Returns the remaining admission slack on success. Never blocks
    /// beyond the admission queue's mutex-protected slot write; a full
    /// queue hands the batch back via [`SubmitError::QueueFull`] for the
    /// producer to retry.
    pub fn inference(&self, batch: Batch) -> Result<usize, SubmitError> {
        let state = self.shared.state();
        if state != DeviceState::Running {
            return Err(SubmitError::NotRunning { state, batch });
        }

        let expected = self.shared.config.model_batch_size;
        if batch.len() != expected {
            return Err(SubmitError::BatchSize {
                expected,
                actual: batch.len(),
                batch,
            });
        }

        match self.shared.admission.try_submit(batch) {
            Ok(slack) => {
                self.shared.metrics.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(slack)
            }
            Err(batch) => {
                self.shared.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                Err(SubmitError::QueueFull(batch))
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DeviceState {
        self.shared.state()
    }

    /// The latched fatal fault, if any, rendered with its source chain.
    pub fn fault(&self) -> Option<String> {
        let fault = lock(&self.shared.fault);
        fault.as_ref().map(|error| {
            let mut message = error.to_string();
            let mut source = std::error::Error::source(error);
            while let Some(inner) = source {
                message.push_str(": ");
                message.push_str(&inner.to_string());
                source = inner.source();
            }
            message
        })
    }

    /// Snapshot of the dispatch counters.
    pub fn metrics(&self) -> DispatchStats {
        self.shared.metrics.snapshot()
    }

    /// Batches currently waiting in the admission queue.
    pub fn pending(&self) -> usize {
        self.shared.admission.len()
    }

    /// Drains and stops the device. Idempotent; also invoked by `Drop`.
    ///
    /// Blocks until the scheduler has drained the admission queue, shim
    /// threads have finished their in-hand payloads, and every in-flight
    /// payload has been completed and released.
    pub fn shutdown(&mut self) {
        let Some(scheduler) = self.scheduler.take() else {
            return;
        };

        // Running → Draining; a latched fault stays latched.
        let _ = self.shared.state.compare_exchange(
            DeviceState::Running as u8,
            DeviceState::Draining as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.shared.terminate.store(true, Ordering::Release);

        if scheduler.join().is_err() {
            tracing::error!(hw_id = self.shared.hw_id, "scheduler thread panicked");
        }
        self.enqueue.shutdown();
        self.shared.wait_idle();

        tracing::info!(
            hw_id = self.shared.hw_id,
            stats = %self.shared.metrics.snapshot().summary(),
            "device shut down"
        );
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("hw_id", &self.shared.hw_id)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}
