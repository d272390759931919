// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The device backend seam.
//!
//! [`DeviceBackend`] abstracts the vendor inference API: a session over one
//! physical accelerator holding `activation_count` pre-activated model
//! instances, each with `set_size` execution slots and pre-bound input and
//! output buffers per port.
//!
//! The contract mirrors the asynchronous C APIs it wraps:
//!
//! - [`init`](DeviceBackend::init) receives the completion handler up
//!   front, before any buffers are enumerated.
//! - [`run`](DeviceBackend::run) must not block. Completion arrives later,
//!   from a backend-owned thread, as
//!   `handler(CompletionKind::DeviceComplete, ctx)` with the same opaque
//!   context that was passed to `run`.
//! - For any `(activation, set)` pair the caller issues at most one
//!   concurrent `run`; backends may treat a violation as a caller bug and
//!   fail the call.
//!
//! A synchronous backend must wrap itself (worker thread + queue) to
//! preserve the non-blocking `run` contract.

use crate::{DType, DeviceBuffer};
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

/// Opaque per-run context, returned verbatim through the completion
/// handler. The dispatch core passes its payload slot here; the backend
/// never looks inside.
pub type UserContext = Box<dyn Any + Send>;

/// Completion event kinds reported by a backend.
///
/// Only [`DeviceComplete`](CompletionKind::DeviceComplete) signifies a
/// finished workload; the dispatch core ignores the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    /// The workload finished and output buffers are valid.
    DeviceComplete,
    /// An intermediate pipeline stage finished. Informational.
    StageComplete,
    /// The workload was abandoned by the backend.
    Aborted,
}

/// Callback installed at [`DeviceBackend::init`]; invoked by backend-owned
/// threads once per `run`.
pub type CompletionHandler = Arc<dyn Fn(CompletionKind, UserContext) + Send + Sync>;

/// Byte layout of one buffer port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BufferLayout {
    /// Element type of the port.
    pub dtype: DType,
    /// Total port size in bytes (whole batch, not per sample).
    pub bytes: usize,
}

/// Session configuration handed to [`DeviceBackend::init`].
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Root directory of the compiled model artefacts.
    pub model_root: PathBuf,
    /// Number of pre-activated model instances on the device.
    pub activation_count: usize,
    /// Execution slots per activation.
    pub set_size: usize,
    /// Backend worker threads per completion queue.
    pub threads_per_queue: usize,
    /// Pipeline stage to bypass (e.g. `"convert"`), if any.
    pub skip_stage: Option<String>,
}

/// A rejected asynchronous dispatch.
///
/// Hands the caller's context back alongside the error so the payload slot
/// riding in it can be recycled instead of leaking — the same shape as
/// `std::sync::mpsc::SendError` returning the unsent value.
pub struct RunError {
    /// Why the dispatch was rejected.
    pub error: BackendError,
    /// The context passed to [`DeviceBackend::run`], returned untouched.
    pub ctx: UserContext,
}

impl RunError {
    /// Pairs a backend error with the rejected context.
    pub fn new(error: BackendError, ctx: UserContext) -> Self {
        Self { error, ctx }
    }
}

impl std::fmt::Debug for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunError").field("error", &self.error).finish()
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Errors surfaced by device backends.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The hardware session could not be created or configured.
    #[error("backend initialisation failed: {0}")]
    InitFailed(String),

    /// An asynchronous dispatch was rejected.
    #[error("run failed on activation {activation} set {set}: {detail}")]
    RunFailed {
        activation: usize,
        set: usize,
        detail: String,
    },

    /// A buffer was requested for a port outside the session's tables.
    #[error("no buffer bound for activation {activation} set {set} port {port}")]
    UnknownBuffer {
        activation: usize,
        set: usize,
        port: usize,
    },

    /// The session has not been initialised yet.
    #[error("backend used before init")]
    NotInitialized,
}

/// Abstract handle over a vendor inference API.
pub trait DeviceBackend: Send + Sync {
    /// Creates the hardware session on device `hw_id` and installs the
    /// completion handler. Called exactly once, before any other method.
    fn init(
        &self,
        hw_id: u32,
        options: &BackendOptions,
        completion: CompletionHandler,
    ) -> Result<(), BackendError>;

    /// Returns the pre-bound buffer for `(activation, set, port)`.
    ///
    /// Ports are numbered inputs first, then outputs: a model with `n`
    /// inputs exposes its first output at port `n`.
    fn buffer(
        &self,
        activation: usize,
        set: usize,
        port: usize,
    ) -> Result<DeviceBuffer, BackendError>;

    /// Issues the workload bound to `(activation, set)` asynchronously.
    ///
    /// Must return without waiting for completion. On success `ctx` comes
    /// back exactly once through the completion handler; on rejection it
    /// comes back immediately inside the [`RunError`].
    fn run(&self, activation: usize, set: usize, ctx: UserContext) -> Result<(), RunError>;
}
