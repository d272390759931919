// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Samples and batches — the units of work the producer submits.

use std::sync::Arc;

/// Per-sample completion callback.
///
/// Invoked exactly once per sample by
/// [`ModelAdapter::postprocess_results`](crate::ModelAdapter::postprocess_results)
/// with the finished result bytes. May be called from a backend completion
/// thread, so it must be `Send + Sync` and should not block.
pub type SampleCallback = Arc<dyn Fn(&Sample, &[u8]) + Send + Sync>;

/// One unit of inference work.
///
/// The producer owns the input bytes; the `Arc` keeps them alive from
/// submission until the callback has fired. `index` is the producer's
/// stable identifier and is carried through the pipeline untouched.
#[derive(Clone)]
pub struct Sample {
    /// Producer-assigned stable identifier.
    pub index: u64,
    /// Producer-owned input bytes for this sample.
    pub input: Arc<[u8]>,
    callback: SampleCallback,
}

/// An ordered batch of samples, always exactly `model_batch_size` long.
pub type Batch = Vec<Sample>;

impl Sample {
    /// Creates a sample from its identifier, input bytes, and callback.
    pub fn new(index: u64, input: Arc<[u8]>, callback: SampleCallback) -> Self {
        Self {
            index,
            input,
            callback,
        }
    }

    /// Delivers the finished result to the producer.
    ///
    /// Must be called exactly once per submitted sample; the dispatch core
    /// guarantees the post-processor itself runs exactly once per batch.
    pub fn complete(&self, data: &[u8]) {
        (self.callback)(self, data);
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("index", &self.index)
            .field("input_len", &self.input.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_complete_invokes_callback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);

        let sample = Sample::new(
            7,
            Arc::from(vec![1u8, 2, 3].into_boxed_slice()),
            Arc::new(move |s, data| {
                assert_eq!(s.index, 7);
                assert_eq!(data, &[9, 9]);
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        sample.complete(&[9, 9]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_debug_hides_callback() {
        let sample = Sample::new(
            1,
            Arc::from(vec![0u8; 4].into_boxed_slice()),
            Arc::new(|_, _| {}),
        );
        let debug = format!("{sample:?}");
        assert!(debug.contains("index"));
        assert!(debug.contains("input_len"));
    }
}
