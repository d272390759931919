// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the dispatch core.

use crate::DeviceState;
use device_api::{AdapterError, BackendError, Batch};

/// Fatal errors for a device: construction failures and mid-stream faults.
///
/// Every variant except `Config` takes the device out of the *Running*
/// state; there is no per-batch recovery inside the core.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The hardware session could not be created or configured.
    #[error("backend initialisation failed")]
    BackendInit(#[source] BackendError),

    /// An asynchronous dispatch was rejected mid-stream.
    #[error("backend run failed")]
    BackendRun(#[source] BackendError),

    /// The model adapter failed while configuring or post-processing.
    #[error("model adapter failed")]
    Adapter(#[source] AdapterError),

    /// The reserved input-select mode was invoked.
    #[error("input select mode 'reserved' is not supported in this revision")]
    ReservedInputSelect,

    /// The device configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A worker thread could not be spawned.
    #[error("failed to spawn {name} thread")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Recoverable rejections of an `inference` submission.
///
/// Each variant hands the batch back so the producer can retry or tear it
/// down — the typed form of the admission `-1` sentinel.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The admission queue is full; retry or back off.
    #[error("admission queue full")]
    QueueFull(Batch),

    /// The batch length does not match the configured model batch size.
    #[error("batch has {actual} samples, model batch size is {expected}")]
    BatchSize {
        expected: usize,
        actual: usize,
        batch: Batch,
    },

    /// The device is draining, failed, or shut down.
    #[error("device is not accepting work (state: {state:?})")]
    NotRunning { state: DeviceState, batch: Batch },
}

impl SubmitError {
    /// Recovers the rejected batch for resubmission.
    pub fn into_batch(self) -> Batch {
        match self {
            SubmitError::QueueFull(batch) => batch,
            SubmitError::BatchSize { batch, .. } => batch,
            SubmitError::NotRunning { batch, .. } => batch,
        }
    }

    /// Returns `true` for the full-queue rejection, the one rejection a
    /// healthy producer is expected to see and retry.
    pub fn is_queue_full(&self) -> bool {
        matches!(self, SubmitError::QueueFull(_))
    }
}
