// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `accel-rt inspect` command: resolve and print a device configuration.

use dispatch_core::DeviceConfig;
use std::path::Path;

pub fn execute(config_path: &Path) -> anyhow::Result<()> {
    let config = DeviceConfig::from_file(config_path)?;

    println!("  Resolved configuration ({}):", config_path.display());
    println!();
    println!("{}", config.to_toml()?);

    let options = config.backend_options();
    println!("  Derived backend options:");
    println!("   Model root:        {}", options.model_root.display());
    println!("   Activations:       {}", options.activation_count);
    println!("   Set size:          {}", options.set_size);
    println!("   Threads per queue: {}", options.threads_per_queue);
    println!(
        "   Skip stage:        {}",
        options.skip_stage.as_deref().unwrap_or("(none)")
    );

    Ok(())
}
