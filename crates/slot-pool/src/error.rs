// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the slot pools.

/// Errors indicating corrupted payload-slot accounting.
///
/// Both variants mean a slot came back that the ring does not expect — a
/// double-release bug in the caller. There is no recovery path inside the
/// pool; callers are expected to treat these as fatal.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A slot was returned to a ring that already holds its full
    /// complement.
    #[error("double release: ring for activation {activation} already holds all {capacity} slots")]
    DoubleRelease { activation: usize, capacity: usize },

    /// A slot was returned to a ring belonging to a different activation.
    #[error("payload for activation {payload_activation} released to ring {ring_activation}")]
    ForeignPayload {
        payload_activation: usize,
        ring_activation: usize,
    },
}
