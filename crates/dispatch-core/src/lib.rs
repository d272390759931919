// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # dispatch-core
//!
//! The per-device inference dispatch pipeline: a bounded producer/consumer
//! core that keeps a fixed-function accelerator saturated without
//! over-subscribing it.
//!
//! One [`Device`] per accelerator. Batches enter through
//! [`Device::inference`], which either admits them into a bounded queue or
//! rejects immediately — the producer is never blocked, only throttled. A
//! pinned scheduler thread round-robins each batch onto the next
//! activation's free payload slot, an enqueue shim (inline or on pinned
//! worker threads) fills the device input buffers and issues the
//! asynchronous run, and the completion dispatcher post-processes outputs,
//! fires per-sample callbacks, and recycles the slot.
//!
//! # Guarantees
//!
//! - Admission never blocks beyond a mutex-protected slot write.
//! - No `(activation, set)` pair ever has two concurrent workloads.
//! - Per-sample identity survives the asynchronous hop; callbacks fire
//!   exactly once per admitted sample (absent a device fault).
//! - Batches are consumed in submission order; completions may reorder.
//!
//! # Example
//! ```no_run
//! use dispatch_core::{Device, DeviceConfig, EchoAdapter, RamBackend};
//! use device_api::{InMemoryDataSource, Sample};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), dispatch_core::DeviceError> {
//! let mut config = DeviceConfig::default();
//! config.loopback = true;
//!
//! let adapter = Arc::new(EchoAdapter::new(64, config.model_batch_size));
//! let backend = Arc::new(RamBackend::new(
//!     adapter.input_layouts(),
//!     adapter.output_layouts(),
//! ));
//! let source = Arc::new(InMemoryDataSource::filled(16, 64));
//!
//! let device = Device::construct(adapter, source, config, 0, vec![], backend)?;
//! let batch = vec![Sample::new(
//!     0,
//!     Arc::from(vec![7u8; 64].into_boxed_slice()),
//!     Arc::new(|s, _data| println!("sample {} done", s.index)),
//! )];
//! device.inference(batch).expect("admitted");
//! # Ok(())
//! # }
//! ```

mod affinity;
mod config;
mod device;
mod echo;
mod enqueue;
mod error;
mod metrics;
mod ram;

pub use affinity::{pin_current_thread, AffinityPlan};
pub use config::{DeviceConfig, InputMode};
pub use device::{Device, DeviceState};
pub use echo::EchoAdapter;
pub use error::{DeviceError, SubmitError};
pub use metrics::DispatchStats;
pub use ram::RamBackend;

pub(crate) use metrics::Counters;
