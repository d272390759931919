// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # slot-pool
//!
//! The two bounded queues at the heart of the dispatch core:
//!
//! - [`SlotRing`] — a fixed pool of pre-allocated [`Payload`] slots, one
//!   ring per activation. A slot is checked out for submission and returned
//!   on completion; the pool never grows and never frees a slot during the
//!   device's lifetime.
//! - [`AdmissionQueue`] — the bounded batch queue between the external
//!   producer and the scheduler thread. Two monotonically increasing
//!   counters, a fixed slot array, and strict back-pressure: a full queue
//!   rejects rather than blocks.
//!
//! # Slot Lifecycle
//!
//! ```text
//! SlotRing (free) ──acquire──► scheduler ──► enqueue shim ──► in flight
//!      ▲                                                          │
//!      └───────────────── release ◄── completion dispatcher ◄─────┘
//! ```
//!
//! A payload slot is in exactly one of those places at any instant. The
//! ring's mutex is held only across the push or pop of a single box;
//! everything between acquire and release is lock-free by ownership.

mod admission;
mod error;
mod payload;
mod ring;

pub use admission::AdmissionQueue;
pub use error::PoolError;
pub use payload::Payload;
pub use ring::SlotRing;
