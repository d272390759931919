// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The payload record paired with each hardware execution slot.

use device_api::Batch;

/// Metadata record pairing a submitted batch with the `(activation, set)`
/// slot it will run on.
///
/// One `Payload` exists per execution slot, boxed once at device
/// initialisation and recycled through its [`crate::SlotRing`] for the
/// device's lifetime. `samples` is empty while the slot is free; the
/// scheduler moves a batch in at dispatch time and the completion
/// dispatcher takes it back out.
///
/// There is no back-pointer to the owning device: the completion handler
/// closure captures the device state instead, so the slot stays a plain
/// data record.
#[derive(Debug)]
pub struct Payload {
    /// Hardware id of the owning device.
    pub device: u32,
    /// Activation this slot belongs to.
    pub activation: usize,
    /// Set index within the activation.
    pub set: usize,
    /// The batch currently riding this slot; empty while free.
    pub samples: Batch,
}

impl Payload {
    /// Creates an empty payload slot with the given identity.
    pub fn new(device: u32, activation: usize, set: usize) -> Self {
        Self {
            device,
            activation,
            set,
            samples: Vec::new(),
        }
    }
}
