// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device configuration loaded from TOML files or constructed
//! programmatically.
//!
//! # TOML Format
//! ```toml
//! model_root = "./models/resnet34-ssd"
//! model_batch_size = 4
//! activation_count = 4
//! set_size = 4
//! threads_per_queue = 4
//! samples_queue_depth = 8
//! scheduler_yield_time_us = 10
//! enqueue_yield_time_us = 10
//! shim_count = 2
//! ringfence_driver = false
//! input_select = "normal"
//! loopback = false
//! skip_stage = "convert"
//! ```
//!
//! Yield times of `0` mean busy-spin; `shim_count = 0` runs the enqueue
//! shim inline on the scheduler thread.

use crate::DeviceError;
use device_api::BackendOptions;
use std::path::{Path, PathBuf};

/// How the enqueue shim fills device input buffers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Call the model adapter's `configure_workload`.
    #[default]
    Normal,
    /// Reserved; invoking it faults the device.
    Reserved,
    /// Leave the buffer bytes as they are (throughput measurement with
    /// random data).
    Random,
}

impl InputMode {
    /// Maps the numeric option value (`0`/`1`/`2`) used by legacy harness
    /// configurations.
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(InputMode::Normal),
            1 => Some(InputMode::Reserved),
            2 => Some(InputMode::Random),
            _ => None,
        }
    }
}

/// Configuration for one device's dispatch pipeline.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Root directory of the compiled model artefacts.
    pub model_root: PathBuf,
    /// Samples per batch; every submission must match exactly.
    pub model_batch_size: usize,
    /// Pre-activated model instances on the device.
    pub activation_count: usize,
    /// Execution slots (payload ring depth) per activation.
    pub set_size: usize,
    /// Backend worker threads per completion queue.
    pub threads_per_queue: usize,
    /// Admission queue capacity, in batches.
    pub samples_queue_depth: usize,
    /// Scheduler sleep when idle, in microseconds; `0` busy-spins.
    pub scheduler_yield_time_us: u64,
    /// Shim sleep when its hand-off cell is empty, in microseconds; `0`
    /// busy-spins.
    pub enqueue_yield_time_us: u64,
    /// Pinned enqueue shim threads; `0` runs the shim inline.
    pub shim_count: usize,
    /// Reserve the leftover affinity CPUs exclusively for the vendor
    /// driver.
    pub ringfence_driver: bool,
    /// Input buffer configuration mode.
    pub input_select: InputMode,
    /// Skip the backend and synthesise completion immediately.
    pub loopback: bool,
    /// Backend pipeline stage to bypass (e.g. `"convert"`), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_stage: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            model_root: PathBuf::from("./models"),
            model_batch_size: 1,
            activation_count: 1,
            set_size: 4,
            threads_per_queue: 1,
            samples_queue_depth: 8,
            scheduler_yield_time_us: 10,
            enqueue_yield_time_us: 10,
            shim_count: 0,
            ringfence_driver: false,
            input_select: InputMode::Normal,
            loopback: false,
            skip_stage: None,
        }
    }
}

impl DeviceConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, DeviceError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DeviceError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, DeviceError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| DeviceError::Config(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, DeviceError> {
        toml::to_string_pretty(self)
            .map_err(|e| DeviceError::Config(format!("TOML serialise error: {e}")))
    }

    /// Checks structural constraints that every pipeline build relies on.
    pub fn validate(&self) -> Result<(), DeviceError> {
        fn positive(name: &str, value: usize) -> Result<(), DeviceError> {
            if value == 0 {
                return Err(DeviceError::Config(format!("{name} must be > 0")));
            }
            Ok(())
        }
        positive("model_batch_size", self.model_batch_size)?;
        positive("activation_count", self.activation_count)?;
        positive("set_size", self.set_size)?;
        positive("threads_per_queue", self.threads_per_queue)?;
        positive("samples_queue_depth", self.samples_queue_depth)?;
        Ok(())
    }

    /// Derives the backend session options from this configuration.
    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            model_root: self.model_root.clone(),
            activation_count: self.activation_count,
            set_size: self.set_size,
            threads_per_queue: self.threads_per_queue,
            skip_stage: self.skip_stage.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let c = DeviceConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.model_batch_size, 1);
        assert_eq!(c.shim_count, 0);
        assert!(!c.loopback);
    }

    #[test]
    fn test_from_toml_partial() {
        let c = DeviceConfig::from_toml(
            r#"
activation_count = 4
set_size = 2
loopback = true
input_select = "random"
"#,
        )
        .unwrap();
        assert_eq!(c.activation_count, 4);
        assert_eq!(c.set_size, 2);
        assert!(c.loopback);
        assert_eq!(c.input_select, InputMode::Random);
        // Unspecified options keep their defaults.
        assert_eq!(c.samples_queue_depth, 8);
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut c = DeviceConfig::default();
        c.shim_count = 2;
        c.skip_stage = Some("convert".into());

        let toml = c.to_toml().unwrap();
        let back = DeviceConfig::from_toml(&toml).unwrap();
        assert_eq!(back.shim_count, 2);
        assert_eq!(back.skip_stage.as_deref(), Some("convert"));
    }

    #[test]
    fn test_zero_options_rejected() {
        for field in [
            "model_batch_size",
            "activation_count",
            "set_size",
            "threads_per_queue",
            "samples_queue_depth",
        ] {
            let toml = format!("{field} = 0");
            let err = DeviceConfig::from_toml(&toml).unwrap_err();
            assert!(
                err.to_string().contains(field),
                "error for {field} should name the option, got: {err}"
            );
        }
    }

    #[test]
    fn test_input_mode_from_index() {
        assert_eq!(InputMode::from_index(0), Some(InputMode::Normal));
        assert_eq!(InputMode::from_index(1), Some(InputMode::Reserved));
        assert_eq!(InputMode::from_index(2), Some(InputMode::Random));
        assert_eq!(InputMode::from_index(3), None);
    }

    #[test]
    fn test_backend_options_mirror_config() {
        let mut c = DeviceConfig::default();
        c.activation_count = 8;
        c.skip_stage = Some("convert".into());

        let opts = c.backend_options();
        assert_eq!(opts.activation_count, 8);
        assert_eq!(opts.set_size, c.set_size);
        assert_eq!(opts.skip_stage.as_deref(), Some("convert"));
    }
}
