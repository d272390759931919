// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmark for the loopback dispatch round trip: admission → scheduler →
//! shim → completion → callback, with the backend short-circuited.

use criterion::{criterion_group, criterion_main, Criterion};
use device_api::{InMemoryDataSource, Sample};
use dispatch_core::{Device, DeviceConfig, EchoAdapter, RamBackend};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn bench_loopback_round_trip(c: &mut Criterion) {
    let mut config = DeviceConfig::default();
    config.loopback = true;
    config.set_size = 4;
    config.samples_queue_depth = 8;
    config.scheduler_yield_time_us = 0;

    let adapter = Arc::new(EchoAdapter::new(64, 1));
    let backend = Arc::new(RamBackend::new(
        adapter.input_layouts(),
        adapter.output_layouts(),
    ));
    let source = Arc::new(InMemoryDataSource::default());
    let device = Device::construct(adapter, source, config, 0, vec![], backend).unwrap();

    let completed = Arc::new(AtomicU64::new(0));
    let input: Arc<[u8]> = Arc::from(vec![0u8; 64].into_boxed_slice());

    c.bench_function("loopback_round_trip", |b| {
        b.iter(|| {
            let done = Arc::clone(&completed);
            let before = done.load(Ordering::Acquire);
            let sample = Sample::new(
                0,
                Arc::clone(&input),
                Arc::new(move |_, _| {
                    done.fetch_add(1, Ordering::AcqRel);
                }),
            );
            let mut batch = vec![sample];
            loop {
                match device.inference(batch) {
                    Ok(_) => break,
                    Err(err) => {
                        batch = err.into_batch();
                        std::hint::spin_loop();
                    }
                }
            }
            while completed.load(Ordering::Acquire) == before {
                std::hint::spin_loop();
            }
        })
    });
}

criterion_group!(benches, bench_loopback_round_trip);
criterion_main!(benches);
