// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The model adapter seam.
//!
//! A [`ModelAdapter`] is the only component that understands a model's
//! tensor layout. The dispatch core calls it at exactly two points:
//!
//! 1. [`configure_workload`](ModelAdapter::configure_workload) — on the
//!    enqueue shim, just before a workload is issued to the hardware.
//! 2. [`postprocess_results`](ModelAdapter::postprocess_results) — on the
//!    completion path, after the hardware reports the workload done.
//!
//! Adapters are stateless per workload: they may hold model constants
//! (priors, thresholds) but must not retain the sample slices or buffer
//! descriptors beyond each call. Both operations run concurrently across
//! different `(activation, set)` pairs, so any scratch state an adapter
//! keeps must be internally synchronised.

use crate::{DType, DataSource, DeviceBuffer, Sample};

/// Errors surfaced by model adapters.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// A sample index was not present in the data source.
    #[error("sample {index} not present in data source")]
    MissingSample { index: u64 },

    /// A device buffer is too small for the configured batch.
    #[error("buffer for port {port} too small: need {needed} bytes, have {have}")]
    BufferTooSmall {
        port: usize,
        needed: usize,
        have: usize,
    },

    /// The buffer table has fewer ports than the adapter expects.
    #[error("expected {expected} {direction} ports, backend exposed {actual}")]
    PortCount {
        direction: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Adapter-specific failure.
    #[error("adapter error: {0}")]
    Other(String),
}

/// Fills input buffers before a run and produces results after it.
pub trait ModelAdapter: Send + Sync {
    /// Number of input ports the model consumes.
    fn input_count(&self) -> usize;

    /// Number of output ports the model produces.
    fn output_count(&self) -> usize;

    /// Element type of input port `port`.
    fn input_dtype(&self, port: usize) -> DType;

    /// Element type of output port `port`.
    fn output_dtype(&self, port: usize) -> DType;

    /// Fills the device input buffers for one batch.
    ///
    /// `inputs` holds one [`DeviceBuffer`] per input port for the
    /// `(activation, set)` pair the batch will run on. The adapter may read
    /// sample bytes from the samples themselves or look them up in
    /// `source`; it must not retain either beyond the call.
    fn configure_workload(
        &self,
        source: &dyn DataSource,
        samples: &[Sample],
        inputs: &[DeviceBuffer],
    ) -> Result<(), AdapterError>;

    /// Reads the device output buffers and delivers per-sample results.
    ///
    /// Must invoke [`Sample::complete`] exactly once for every sample in
    /// `samples`, in the order it produces the results. Output bytes are
    /// valid only until this call returns (the slot is recycled after).
    fn postprocess_results(
        &self,
        samples: &[Sample],
        outputs: &[DeviceBuffer],
    ) -> Result<(), AdapterError>;
}
