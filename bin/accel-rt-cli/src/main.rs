// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # accel-rt
//!
//! Command-line harness for the accel-dispatch-rt core.
//!
//! ## Usage
//! ```bash
//! # Push batches through a loopback device and report throughput
//! accel-rt run --batches 1000 --loopback
//!
//! # Sweep shim configurations against the software backend
//! accel-rt benchmark --batches 2000 --shims 0,1,2
//!
//! # Resolve and print a device configuration
//! accel-rt inspect --config device.toml
//! ```

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "accel-rt",
    about = "Inference dispatch harness for fixed-function accelerators",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive one device with synthetic batches and report the results.
    Run {
        /// Path to a TOML device configuration (defaults apply if omitted).
        #[arg(short, long)]
        config: Option<std::path::PathBuf>,

        /// Number of batches to submit.
        #[arg(short, long, default_value_t = 1000)]
        batches: usize,

        /// Per-sample frame size in bytes.
        #[arg(long, default_value_t = 64)]
        frame_bytes: usize,

        /// Skip the backend and synthesise completions.
        #[arg(long)]
        loopback: bool,

        /// CPU affinity list, leaf-first (e.g. "0,1,2,3").
        #[arg(long)]
        affinity: Option<String>,
    },

    /// Benchmark dispatch throughput across shim configurations.
    Benchmark {
        /// Number of batches per configuration.
        #[arg(short, long, default_value_t = 2000)]
        batches: usize,

        /// Comma-separated shim counts to sweep.
        #[arg(long, default_value = "0,1,2")]
        shims: String,

        /// Per-sample frame size in bytes.
        #[arg(long, default_value_t = 64)]
        frame_bytes: usize,
    },

    /// Resolve a device configuration and print it.
    Inspect {
        /// Path to a TOML device configuration.
        #[arg(short, long)]
        config: std::path::PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            batches,
            frame_bytes,
            loopback,
            affinity,
        } => commands::run::execute(config, batches, frame_bytes, loopback, affinity),
        Commands::Benchmark {
            batches,
            shims,
            frame_bytes,
        } => commands::benchmark::execute(batches, &shims, frame_bytes),
        Commands::Inspect { config } => commands::inspect::execute(&config),
    }
}
