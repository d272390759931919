// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The reference model adapter.
//!
//! [`EchoAdapter`] treats the model as the identity function over
//! fixed-size per-sample frames: one input port and one output port, each
//! `frame_bytes × batch_size` long, with sample *i* occupying frame *i*.
//! Paired with [`crate::RamBackend`] it exercises every stage of the
//! dispatch path — configure, run, complete, callback — while keeping the
//! tensor work trivial.

use device_api::{
    AdapterError, BufferLayout, DType, DataSource, DeviceBuffer, ModelAdapter, Sample,
};

/// Identity-model adapter over fixed-size sample frames.
#[derive(Debug, Clone)]
pub struct EchoAdapter {
    frame_bytes: usize,
    batch_size: usize,
}

impl EchoAdapter {
    /// Creates an adapter for `batch_size` samples of `frame_bytes` each.
    pub fn new(frame_bytes: usize, batch_size: usize) -> Self {
        assert!(frame_bytes > 0, "frame_bytes must be > 0");
        assert!(batch_size > 0, "batch_size must be > 0");
        Self {
            frame_bytes,
            batch_size,
        }
    }

    /// Input port layouts matching this adapter, for backend construction.
    pub fn input_layouts(&self) -> Vec<BufferLayout> {
        vec![BufferLayout {
            dtype: DType::U8,
            bytes: self.frame_bytes * self.batch_size,
        }]
    }

    /// Output port layouts matching this adapter.
    pub fn output_layouts(&self) -> Vec<BufferLayout> {
        self.input_layouts()
    }

    fn check_port<'b>(
        &self,
        buffers: &'b [DeviceBuffer],
        direction: &'static str,
        batch_len: usize,
    ) -> Result<&'b DeviceBuffer, AdapterError> {
        let buffer = buffers.first().ok_or(AdapterError::PortCount {
            direction,
            expected: 1,
            actual: buffers.len(),
        })?;
        let needed = self.frame_bytes * batch_len;
        if buffer.len() < needed {
            return Err(AdapterError::BufferTooSmall {
                port: 0,
                needed,
                have: buffer.len(),
            });
        }
        Ok(buffer)
    }
}

impl ModelAdapter for EchoAdapter {
    fn input_count(&self) -> usize {
        1
    }

    fn output_count(&self) -> usize {
        1
    }

    fn input_dtype(&self, _port: usize) -> DType {
        DType::U8
    }

    fn output_dtype(&self, _port: usize) -> DType {
        DType::U8
    }

    fn configure_workload(
        &self,
        source: &dyn DataSource,
        samples: &[Sample],
        inputs: &[DeviceBuffer],
    ) -> Result<(), AdapterError> {
        let buffer = self.check_port(inputs, "input", samples.len())?;

        for (i, sample) in samples.iter().enumerate() {
            // Prefer the bytes riding on the sample; fall back to the
            // preloaded library for index-only samples.
            let bytes: &[u8] = if sample.input.is_empty() {
                source
                    .sample_bytes(sample.index)
                    .ok_or(AdapterError::MissingSample {
                        index: sample.index,
                    })?
            } else {
                &sample.input
            };
            let n = bytes.len().min(self.frame_bytes);
            buffer.write(i * self.frame_bytes, &bytes[..n]);
        }
        Ok(())
    }

    fn postprocess_results(
        &self,
        samples: &[Sample],
        outputs: &[DeviceBuffer],
    ) -> Result<(), AdapterError> {
        let buffer = self.check_port(outputs, "output", samples.len())?;

        let mut frame = vec![0u8; self.frame_bytes];
        for (i, sample) in samples.iter().enumerate() {
            buffer.read(i * self.frame_bytes, &mut frame);
            sample.complete(&frame);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_api::InMemoryDataSource;
    use std::sync::{Arc, Mutex};

    fn buffer_over(storage: &mut Vec<u8>) -> DeviceBuffer {
        unsafe { DeviceBuffer::from_raw(storage.as_mut_ptr(), storage.len(), DType::U8) }
    }

    fn sample_with_input(index: u64, bytes: &[u8]) -> Sample {
        Sample::new(
            index,
            Arc::from(bytes.to_vec().into_boxed_slice()),
            Arc::new(|_, _| {}),
        )
    }

    #[test]
    fn test_configure_writes_frames() {
        let adapter = EchoAdapter::new(4, 2);
        let source = InMemoryDataSource::default();
        let mut storage = vec![0u8; 8];
        let input = buffer_over(&mut storage);

        let samples = vec![
            sample_with_input(0, &[1, 1, 1, 1]),
            sample_with_input(1, &[2, 2]),
        ];
        adapter
            .configure_workload(&source, &samples, &[input])
            .unwrap();

        // Short sample bytes leave the rest of the frame untouched.
        assert_eq!(input.to_vec(), vec![1, 1, 1, 1, 2, 2, 0, 0]);
    }

    #[test]
    fn test_configure_falls_back_to_source() {
        let adapter = EchoAdapter::new(2, 1);
        let source = InMemoryDataSource::filled(3, 2);
        let mut storage = vec![0u8; 2];
        let input = buffer_over(&mut storage);

        let samples = vec![sample_with_input(2, &[])];
        adapter
            .configure_workload(&source, &samples, &[input])
            .unwrap();
        assert_eq!(input.to_vec(), vec![2, 2]);
    }

    #[test]
    fn test_configure_missing_sample() {
        let adapter = EchoAdapter::new(2, 1);
        let source = InMemoryDataSource::default();
        let mut storage = vec![0u8; 2];
        let input = buffer_over(&mut storage);

        let samples = vec![sample_with_input(5, &[])];
        let err = adapter
            .configure_workload(&source, &samples, &[input])
            .unwrap_err();
        assert!(matches!(err, AdapterError::MissingSample { index: 5 }));
    }

    #[test]
    fn test_postprocess_delivers_frames_in_order() {
        let adapter = EchoAdapter::new(2, 2);
        let mut storage = vec![10, 11, 20, 21];
        let output = buffer_over(&mut storage);

        let delivered: Arc<Mutex<Vec<(u64, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
        let samples: Vec<Sample> = (0..2)
            .map(|i| {
                let delivered = Arc::clone(&delivered);
                Sample::new(
                    i,
                    Arc::from(Vec::new().into_boxed_slice()),
                    Arc::new(move |s, data| {
                        delivered.lock().unwrap().push((s.index, data.to_vec()));
                    }),
                )
            })
            .collect();

        adapter.postprocess_results(&samples, &[output]).unwrap();

        let got = delivered.lock().unwrap();
        assert_eq!(*got, vec![(0, vec![10, 11]), (1, vec![20, 21])]);
    }

    #[test]
    fn test_missing_port_rejected() {
        let adapter = EchoAdapter::new(2, 1);
        let source = InMemoryDataSource::default();
        let samples = vec![sample_with_input(0, &[1, 2])];

        let err = adapter.configure_workload(&source, &samples, &[]).unwrap_err();
        assert!(matches!(
            err,
            AdapterError::PortCount {
                direction: "input",
                ..
            }
        ));
    }

    #[test]
    fn test_small_buffer_rejected() {
        let adapter = EchoAdapter::new(4, 2);
        let source = InMemoryDataSource::default();
        let mut storage = vec![0u8; 4];
        let input = buffer_over(&mut storage);

        let samples = vec![sample_with_input(0, &[1]), sample_with_input(1, &[2])];
        let err = adapter
            .configure_workload(&source, &samples, &[input])
            .unwrap_err();
        assert!(matches!(
            err,
            AdapterError::BufferTooSmall {
                needed: 8,
                have: 4,
                ..
            }
        ));
    }
}
