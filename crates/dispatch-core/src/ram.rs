// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A host-memory software backend.
//!
//! [`RamBackend`] implements [`DeviceBackend`] without hardware: `init`
//! allocates every `(activation, set, port)` buffer on the heap from the
//! declared port layouts, and `run` enqueues the job to a small pool of
//! worker threads that copy input port *i* to output port *i* and then
//! invoke the completion handler — a device that "infers" the identity
//! function. Tests, benches, and the CLI drive the full dispatch path
//! through it; a real vendor backend replaces it wholesale.
//!
//! The backend enforces the single-outstanding-run contract per
//! `(activation, set)` and rejects violations, which makes it double as a
//! watchdog for slot-accounting bugs in the layers above.

use device_api::{
    BackendError, BackendOptions, BufferLayout, CompletionHandler, CompletionKind, DeviceBackend,
    DeviceBuffer, RunError, UserContext,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Owned heap storage behind one device buffer.
struct RawBuf {
    ptr: *mut u8,
    len: usize,
}

// Only ever touched through DeviceBuffer descriptors, which carry their
// own exclusivity contract.
unsafe impl Send for RawBuf {}
unsafe impl Sync for RawBuf {}

impl RawBuf {
    fn zeroed(len: usize) -> Self {
        let boxed = vec![0u8; len].into_boxed_slice();
        let ptr = Box::into_raw(boxed) as *mut u8;
        Self { ptr, len }
    }
}

impl Drop for RawBuf {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr, self.len,
            )));
        }
    }
}

/// One queued run.
struct Job {
    activation: usize,
    set: usize,
    ctx: UserContext,
}

/// Live session state, created at `init`.
struct Session {
    activation_count: usize,
    set_size: usize,
    input_count: usize,
    output_count: usize,
    completion: CompletionHandler,
    /// `[activation][set][port]`, inputs then outputs.
    buffers: Vec<Vec<Vec<DeviceBuffer>>>,
    /// Outstanding-run flags, indexed `activation * set_size + set`.
    busy: Vec<AtomicBool>,
    /// Keeps the heap allocations alive; freed with the session.
    _storage: Vec<RawBuf>,
}

struct RamInner {
    inputs: Vec<BufferLayout>,
    outputs: Vec<BufferLayout>,
    session: Mutex<Option<Session>>,
    jobs: Mutex<VecDeque<Job>>,
    available: Condvar,
    terminate: AtomicBool,
}

/// Software [`DeviceBackend`] over host memory; see the module docs.
pub struct RamBackend {
    inner: Arc<RamInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RamBackend {
    /// Declares the backend's port layouts, inputs then outputs. Buffers
    /// are allocated later, at [`DeviceBackend::init`].
    pub fn new(inputs: Vec<BufferLayout>, outputs: Vec<BufferLayout>) -> Self {
        Self {
            inner: Arc::new(RamInner {
                inputs,
                outputs,
                session: Mutex::new(None),
                jobs: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                terminate: AtomicBool::new(false),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DeviceBackend for RamBackend {
    fn init(
        &self,
        hw_id: u32,
        options: &BackendOptions,
        completion: CompletionHandler,
    ) -> Result<(), BackendError> {
        let mut session = lock(&self.inner.session);
        if session.is_some() {
            return Err(BackendError::InitFailed(
                "session already initialised".into(),
            ));
        }

        // Allocate every (activation, set, port) buffer up front.
        let port_layouts: Vec<BufferLayout> = self
            .inner
            .inputs
            .iter()
            .chain(self.inner.outputs.iter())
            .copied()
            .collect();
        let mut storage = Vec::new();
        let mut buffers = Vec::with_capacity(options.activation_count);
        for _a in 0..options.activation_count {
            let mut sets = Vec::with_capacity(options.set_size);
            for _s in 0..options.set_size {
                let mut ports = Vec::with_capacity(port_layouts.len());
                for layout in &port_layouts {
                    let raw = RawBuf::zeroed(layout.bytes);
                    ports.push(unsafe { DeviceBuffer::from_raw(raw.ptr, raw.len, layout.dtype) });
                    storage.push(raw);
                }
                sets.push(ports);
            }
            buffers.push(sets);
        }

        let slots = options.activation_count * options.set_size;
        *session = Some(Session {
            activation_count: options.activation_count,
            set_size: options.set_size,
            input_count: self.inner.inputs.len(),
            output_count: self.inner.outputs.len(),
            completion,
            buffers,
            busy: (0..slots).map(|_| AtomicBool::new(false)).collect(),
            _storage: storage,
        });
        drop(session);

        let worker_count = options.threads_per_queue.max(1);
        let mut workers = lock(&self.workers);
        for id in 0..worker_count {
            let inner = Arc::clone(&self.inner);
            let handle = std::thread::Builder::new()
                .name(format!("ram-{hw_id}-worker-{id}"))
                .spawn(move || worker_loop(inner))
                .map_err(|e| BackendError::InitFailed(format!("cannot spawn worker: {e}")))?;
            workers.push(handle);
        }

        tracing::info!(
            hw_id,
            activations = options.activation_count,
            set_size = options.set_size,
            workers = worker_count,
            "ram backend session created"
        );
        Ok(())
    }

    fn buffer(
        &self,
        activation: usize,
        set: usize,
        port: usize,
    ) -> Result<DeviceBuffer, BackendError> {
        let session = lock(&self.inner.session);
        let session = session.as_ref().ok_or(BackendError::NotInitialized)?;
        if activation >= session.activation_count
            || set >= session.set_size
            || port >= session.input_count + session.output_count
        {
            return Err(BackendError::UnknownBuffer {
                activation,
                set,
                port,
            });
        }
        Ok(session.buffers[activation][set][port])
    }

    fn run(&self, activation: usize, set: usize, ctx: UserContext) -> Result<(), RunError> {
        {
            let session = lock(&self.inner.session);
            let Some(session) = session.as_ref() else {
                return Err(RunError::new(BackendError::NotInitialized, ctx));
            };
            if activation >= session.activation_count || set >= session.set_size {
                return Err(RunError::new(
                    BackendError::UnknownBuffer {
                        activation,
                        set,
                        port: 0,
                    },
                    ctx,
                ));
            }
            let slot = activation * session.set_size + set;
            if session.busy[slot].swap(true, Ordering::AcqRel) {
                return Err(RunError::new(
                    BackendError::RunFailed {
                        activation,
                        set,
                        detail: "slot already has an outstanding run".into(),
                    },
                    ctx,
                ));
            }
        }

        lock(&self.inner.jobs).push_back(Job {
            activation,
            set,
            ctx,
        });
        self.inner.available.notify_one();
        Ok(())
    }
}

/// Worker body: pop a job, echo inputs to outputs, complete.
fn worker_loop(inner: Arc<RamInner>) {
    loop {
        let job = {
            let mut jobs = lock(&inner.jobs);
            loop {
                if let Some(job) = jobs.pop_front() {
                    break Some(job);
                }
                if inner.terminate.load(Ordering::Acquire) {
                    break None;
                }
                jobs = inner
                    .available
                    .wait(jobs)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        };
        let Some(job) = job else {
            break;
        };

        let (ports, pairs, completion) = {
            let session = lock(&inner.session);
            let session = session
                .as_ref()
                .expect("job queued without a live session");
            (
                session.buffers[job.activation][job.set].clone(),
                session.input_count.min(session.output_count),
                Arc::clone(&session.completion),
            )
        };

        // The "inference": output port i mirrors input port i.
        let input_count = inner.inputs.len();
        for i in 0..pairs {
            let src = ports[i];
            let dst = ports[input_count + i];
            let n = src.len().min(dst.len());
            let bytes = src.to_vec();
            dst.write(0, &bytes[..n]);
        }

        // Clear busy before completing: the dispatch core may re-issue the
        // slot the instant its callback path releases it.
        {
            let session = lock(&inner.session);
            if let Some(session) = session.as_ref() {
                let slot = job.activation * session.set_size + job.set;
                session.busy[slot].store(false, Ordering::Release);
            }
        }

        completion(CompletionKind::DeviceComplete, job.ctx);
    }
}

impl Drop for RamBackend {
    fn drop(&mut self) {
        self.inner.terminate.store(true, Ordering::Release);
        self.inner.available.notify_all();
        let current = std::thread::current().id();
        let workers = std::mem::take(&mut *lock(&self.workers));
        for handle in workers {
            // Drop can land on a worker thread when a completion holds the
            // last reference to the owning device; that thread must not
            // join itself and exits on its own via the terminate flag.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("ram backend worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_api::DType;
    use std::sync::mpsc;
    use std::time::Duration;

    fn options(activations: usize, sets: usize) -> BackendOptions {
        BackendOptions {
            model_root: "unused".into(),
            activation_count: activations,
            set_size: sets,
            threads_per_queue: 1,
            skip_stage: None,
        }
    }

    fn layout(bytes: usize) -> BufferLayout {
        BufferLayout {
            dtype: DType::U8,
            bytes,
        }
    }

    #[test]
    fn test_buffer_before_init() {
        let backend = RamBackend::new(vec![layout(8)], vec![layout(8)]);
        assert!(matches!(
            backend.buffer(0, 0, 0),
            Err(BackendError::NotInitialized)
        ));
    }

    #[test]
    fn test_init_allocates_all_ports() {
        let backend = RamBackend::new(vec![layout(16)], vec![layout(4)]);
        backend
            .init(0, &options(2, 3), Arc::new(|_, _| {}))
            .unwrap();

        // All (activation, set, port) combinations resolve.
        for a in 0..2 {
            for s in 0..3 {
                assert_eq!(backend.buffer(a, s, 0).unwrap().len(), 16);
                assert_eq!(backend.buffer(a, s, 1).unwrap().len(), 4);
            }
        }
        assert!(matches!(
            backend.buffer(0, 0, 2),
            Err(BackendError::UnknownBuffer { .. })
        ));
        assert!(matches!(
            backend.buffer(2, 0, 0),
            Err(BackendError::UnknownBuffer { .. })
        ));
    }

    #[test]
    fn test_double_init_rejected() {
        let backend = RamBackend::new(vec![layout(8)], vec![layout(8)]);
        backend.init(0, &options(1, 1), Arc::new(|_, _| {})).unwrap();
        assert!(matches!(
            backend.init(0, &options(1, 1), Arc::new(|_, _| {})),
            Err(BackendError::InitFailed(_))
        ));
    }

    #[test]
    fn test_run_echoes_and_completes() {
        let backend = RamBackend::new(vec![layout(4)], vec![layout(4)]);
        let (tx, rx) = mpsc::channel();
        backend
            .init(
                0,
                &options(1, 1),
                Arc::new(move |kind, ctx| {
                    assert_eq!(kind, CompletionKind::DeviceComplete);
                    let tag = *ctx.downcast::<u32>().unwrap();
                    tx.send(tag).unwrap();
                }),
            )
            .unwrap();

        backend.buffer(0, 0, 0).unwrap().write(0, &[1, 2, 3, 4]);
        backend.run(0, 0, Box::new(7u32)).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        assert_eq!(backend.buffer(0, 0, 1).unwrap().to_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_concurrent_run_on_same_slot_rejected() {
        let backend = RamBackend::new(vec![layout(4)], vec![layout(4)]);
        let (done_tx, done_rx) = mpsc::channel::<u32>();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate = Mutex::new(gate_rx);
        backend
            .init(
                0,
                &options(1, 2),
                Arc::new(move |_, ctx| {
                    let tag = *ctx.downcast::<u32>().unwrap();
                    if tag == 0 {
                        // Hold the single worker until the test releases it.
                        gate.lock().unwrap().recv().unwrap();
                    }
                    done_tx.send(tag).unwrap();
                }),
            )
            .unwrap();

        // Occupy the only worker on set 1, then queue a run on set 0.
        // The queued run cannot start, so its slot stays busy.
        backend.run(0, 1, Box::new(0u32)).unwrap();
        backend.run(0, 0, Box::new(1u32)).unwrap();

        let err = backend.run(0, 0, Box::new(2u32)).unwrap_err();
        assert!(matches!(err.error, BackendError::RunFailed { .. }));
        // The context rides back in the error.
        assert_eq!(*err.ctx.downcast::<u32>().unwrap(), 2);

        // Release the worker; both queued jobs complete and the slot
        // becomes usable again.
        gate_tx.send(()).unwrap();
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        backend.run(0, 0, Box::new(3u32)).unwrap();
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 3);
    }
}
