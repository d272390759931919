// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `accel-rt run` command: drive one device with synthetic batches.

use device_api::InMemoryDataSource;
use dispatch_core::{Device, DeviceConfig, EchoAdapter, RamBackend};
use std::path::PathBuf;
use std::sync::Arc;

pub fn execute(
    config_path: Option<PathBuf>,
    batches: usize,
    frame_bytes: usize,
    loopback: bool,
    affinity: Option<String>,
) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║             accel-rt · Dispatch Runner              ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    // ── Configuration ──────────────────────────────────────────
    let mut config = match &config_path {
        Some(path) => DeviceConfig::from_file(path)?,
        None => DeviceConfig::default(),
    };
    if loopback {
        config.loopback = true;
    }
    let affinities = match &affinity {
        Some(list) => super::parse_list(list)?,
        None => Vec::new(),
    };

    println!("  Config:");
    println!("   Activations:  {}", config.activation_count);
    println!("   Set size:     {}", config.set_size);
    println!("   Queue depth:  {}", config.samples_queue_depth);
    println!("   Batch size:   {}", config.model_batch_size);
    println!("   Shim threads: {}", config.shim_count);
    println!("   Loopback:     {}", config.loopback);
    println!("   Batches:      {batches}");
    println!();

    // ── Build the device ───────────────────────────────────────
    println!("  [1/2] Constructing device...");
    let adapter = Arc::new(EchoAdapter::new(frame_bytes, config.model_batch_size));
    let backend = Arc::new(RamBackend::new(
        adapter.input_layouts(),
        adapter.output_layouts(),
    ));
    let source = Arc::new(InMemoryDataSource::default());
    let batch_size = config.model_batch_size;

    let mut device = Device::construct(adapter, source, config, 0, affinities, backend)?;

    // ── Drive it ───────────────────────────────────────────────
    println!("  [2/2] Submitting {batches} batches...");
    let elapsed = super::drive(&device, batches, batch_size, frame_bytes)?;
    println!();

    let stats = device.metrics();
    let throughput = batches as f64 / elapsed.as_secs_f64();
    println!("  Results:");
    println!("   Wall clock:  {:.2} ms", elapsed.as_secs_f64() * 1000.0);
    println!("   Throughput:  {throughput:.0} batches/s");
    println!("   {}", stats.summary());

    device.shutdown();
    Ok(())
}
