// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `accel-rt benchmark` command: sweep shim configurations.

use device_api::InMemoryDataSource;
use dispatch_core::{Device, DeviceConfig, EchoAdapter, RamBackend};
use std::sync::Arc;

pub fn execute(batches: usize, shims: &str, frame_bytes: usize) -> anyhow::Result<()> {
    let shim_counts = super::parse_list(shims)?;

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║            accel-rt · Dispatch Benchmark            ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
    println!("  {batches} batches per configuration, software backend");
    println!();
    println!("  {:<6} {:>14} {:>16} {:>14}", "shims", "wall (ms)", "batches/s", "sched idle");
    println!("  {:-<6} {:->14} {:->16} {:->14}", "", "", "", "");

    for shim_count in shim_counts {
        let mut config = DeviceConfig::default();
        config.activation_count = 2;
        config.set_size = 4;
        config.samples_queue_depth = 16;
        config.shim_count = shim_count;
        config.scheduler_yield_time_us = 5;
        config.enqueue_yield_time_us = 5;

        let adapter = Arc::new(EchoAdapter::new(frame_bytes, config.model_batch_size));
        let backend = Arc::new(RamBackend::new(
            adapter.input_layouts(),
            adapter.output_layouts(),
        ));
        let source = Arc::new(InMemoryDataSource::default());
        let batch_size = config.model_batch_size;

        let mut device = Device::construct(adapter, source, config, 0, Vec::new(), backend)?;
        let elapsed = super::drive(&device, batches, batch_size, frame_bytes)?;
        let stats = device.metrics();
        device.shutdown();

        println!(
            "  {:<6} {:>14.2} {:>16.0} {:>14}",
            shim_count,
            elapsed.as_secs_f64() * 1000.0,
            batches as f64 / elapsed.as_secs_f64(),
            stats.scheduler_idle,
        );
    }

    println!();
    Ok(())
}
