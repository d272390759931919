// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! CLI subcommand implementations.

pub mod benchmark;
pub mod inspect;
pub mod run;

use device_api::Sample;
use dispatch_core::{Device, SubmitError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Initialises tracing from the `-v` count; `RUST_LOG` overrides it.
pub fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Drives `batches` single-producer submissions through `device` and waits
/// for every callback. Returns the wall-clock time of the whole run.
pub(crate) fn drive(
    device: &Device,
    batches: usize,
    batch_size: usize,
    frame_bytes: usize,
) -> anyhow::Result<Duration> {
    let completed = Arc::new(AtomicU64::new(0));
    let total_samples = (batches * batch_size) as u64;

    let start = Instant::now();
    for b in 0..batches {
        let mut batch: Vec<Sample> = (0..batch_size)
            .map(|i| {
                let index = (b * batch_size + i) as u64;
                let done = Arc::clone(&completed);
                Sample::new(
                    index,
                    Arc::from(vec![index as u8; frame_bytes].into_boxed_slice()),
                    Arc::new(move |_, _| {
                        done.fetch_add(1, Ordering::Relaxed);
                    }),
                )
            })
            .collect();

        // Back off briefly on admission rejection, as a producer would.
        loop {
            match device.inference(batch) {
                Ok(_) => break,
                Err(SubmitError::QueueFull(back)) => {
                    batch = back;
                    std::thread::yield_now();
                }
                Err(other) => anyhow::bail!("submission refused: {other}"),
            }
        }
    }

    let deadline = Instant::now() + Duration::from_secs(60);
    while completed.load(Ordering::Relaxed) < total_samples {
        if Instant::now() > deadline {
            anyhow::bail!(
                "timed out: {}/{} callbacks",
                completed.load(Ordering::Relaxed),
                total_samples
            );
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    Ok(start.elapsed())
}

/// Parses a comma-separated list of unsigned integers.
pub(crate) fn parse_list(s: &str) -> anyhow::Result<Vec<usize>> {
    s.split(',')
        .map(|part| {
            part.trim()
                .parse::<usize>()
                .map_err(|e| anyhow::anyhow!("invalid list entry '{part}': {e}"))
        })
        .collect()
}
