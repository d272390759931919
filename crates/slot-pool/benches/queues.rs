// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for the admission queue and the payload slot ring.
//!
//! Both sit on the dispatch hot path: every batch crosses the admission
//! queue once and a slot ring twice (acquire + release).

use criterion::{criterion_group, criterion_main, Criterion};
use slot_pool::{AdmissionQueue, SlotRing};

fn bench_admission_submit_pop(c: &mut Criterion) {
    let queue = AdmissionQueue::new(64);
    c.bench_function("admission_submit_pop", |b| {
        b.iter(|| {
            queue.try_submit(std::hint::black_box(42u64)).unwrap();
            std::hint::black_box(queue.try_pop());
        })
    });
}

fn bench_ring_acquire_release(c: &mut Criterion) {
    let ring = SlotRing::new(0, 0, 8);
    c.bench_function("ring_acquire_release", |b| {
        b.iter(|| {
            let slot = ring.acquire().unwrap();
            ring.release(std::hint::black_box(slot)).unwrap();
        })
    });
}

criterion_group!(benches, bench_admission_submit_pop, bench_ring_acquire_release);
criterion_main!(benches);
