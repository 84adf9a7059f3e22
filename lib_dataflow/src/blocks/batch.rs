//! # Batch Block
//!
//! Collects items into `Vec`s of `batch_size` and emits each full batch as one
//! message. A partial batch leaves the block in two cases only:
//!
//! - [`BatchBlock::trigger_batch`] is called, typically from an external
//!   `tokio::time::interval` to get time-windowed batches.
//! - The block completes; the remainder is emitted once, right before the
//!   block reaches `Completed`.
//!
//! Both the batching worker and `trigger_batch` move items from the input
//! queue into the current batch while holding the same batch lock, so a
//! trigger never splits or reorders items with respect to the worker.
//!
//! Items keep their capacity slot while they sit in the current batch and
//! until the batch containing them is delivered.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::{Arc, Mutex};

use crate::core::input::InputQueue;
use crate::core::output::OutputPort;
use crate::core::{block_name, impl_core_source, impl_core_target, BlockCore};
use crate::error::DataflowError;
use crate::options::BatchOptions;

struct Batcher<T> {
    input: Arc<InputQueue<T>>,
    port: Arc<OutputPort<Vec<T>>>,
    batch_size: usize,
    current: Mutex<Vec<T>>,
}

impl<T: Send + 'static> Batcher<T> {
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        self.current.lock().expect("batch lock poisoned")
    }

    /// Moves queued items into the batch, emitting every batch that fills.
    fn drain_into(&self, current: &mut Vec<T>) {
        while let Some(message) = self.input.try_dequeue() {
            current.push(message.into_payload());
            if current.len() == self.batch_size {
                let full = std::mem::replace(current, Vec::with_capacity(self.batch_size));
                self.port.push(full, self.batch_size);
            }
        }
    }

    fn emit_partial(&self, current: &mut Vec<T>) -> usize {
        if current.is_empty() {
            return 0;
        }
        let partial = std::mem::take(current);
        let len = partial.len();
        self.port.push(partial, len);
        len
    }

    fn trigger(&self) -> usize {
        if self.input.status().is_faulted() {
            return 0;
        }
        let mut current = self.lock();
        self.drain_into(&mut current);
        self.emit_partial(&mut current)
    }

    async fn run(self: Arc<Self>) {
        let status = Arc::clone(self.input.status());
        loop {
            if status.is_faulted() {
                let dropped = std::mem::take(&mut *self.lock()).len();
                if dropped > 0 {
                    log::debug!(
                        "Batch block '{}' dropped a partial batch of {} on fault",
                        status.name(),
                        dropped
                    );
                }
                return;
            }
            {
                let mut current = self.lock();
                self.drain_into(&mut current);
                if !status.is_accepting() && self.input.is_empty() {
                    self.emit_partial(&mut current);
                    drop(current);
                    self.port.finish();
                    return;
                }
            }
            self.input.available().notified().await;
        }
    }
}

/// # Batch Block
pub struct BatchBlock<T> {
    core: BlockCore<T, Vec<T>>,
    batcher: Arc<Batcher<T>>,
}

impl<T: Send + 'static> BatchBlock<T> {
    /// Creates the block and starts its batching worker.
    pub fn new(options: BatchOptions) -> Result<Arc<Self>, DataflowError> {
        options.validate()?;
        let core = BlockCore::with_output(block_name("batch", &options.name), options.bounded_capacity);
        let port = core
            .output
            .clone()
            .ok_or_else(|| DataflowError::InvalidOptions("batch block needs an output".into()))?;
        let batcher = Arc::new(Batcher {
            input: Arc::clone(&core.input),
            port,
            batch_size: options.batch_size,
            current: Mutex::new(Vec::with_capacity(options.batch_size)),
        });
        tokio::spawn(Arc::clone(&batcher).run());
        log::debug!(
            "Created batch block '{}' (batch size {})",
            core.name(),
            options.batch_size
        );
        Ok(Arc::new(Self { core, batcher }))
    }

    /// Configured batch size.
    pub fn batch_size(&self) -> usize {
        self.batcher.batch_size
    }

    /// Emits everything accepted so far: queued items are batched first
    /// (full batches go out as they fill), then the remaining partial batch is
    /// emitted. Returns the size of that partial batch; `0` means nothing was
    /// left over and nothing extra was emitted.
    pub fn trigger_batch(&self) -> usize {
        self.batcher.trigger()
    }

    /// Items accepted but not yet moved into a batch.
    pub fn input_count(&self) -> usize {
        self.core.input_count()
    }

    /// Items in the current, not yet emitted batch.
    pub fn pending_batch_len(&self) -> usize {
        self.batcher.lock().len()
    }
}

impl_core_target!(BatchBlock<T>, T);
impl_core_source!(BatchBlock<T>, Vec<T>);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, Source, Target};

    #[tokio::test]
    async fn emits_full_batches_then_the_remainder_on_completion() {
        let batch = BatchBlock::new(BatchOptions::new(10)).unwrap();
        for i in 0..45 {
            assert!(batch.post(i));
        }
        batch.complete();
        let mut sizes = Vec::new();
        let mut flat = Vec::new();
        while let Some(items) = batch.receive().await {
            sizes.push(items.len());
            flat.extend(items);
        }
        assert_eq!(sizes, vec![10, 10, 10, 10, 5]);
        assert_eq!(flat, (0..45).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn trigger_flushes_a_partial_batch() {
        let batch = BatchBlock::new(BatchOptions::new(4)).unwrap();
        for i in 0..3 {
            batch.post(i);
        }
        assert_eq!(batch.trigger_batch(), 3);
        assert_eq!(batch.receive().await, Some(vec![0, 1, 2]));
        // Nothing pending: no empty batch is emitted.
        assert_eq!(batch.trigger_batch(), 0);
        assert_eq!(batch.try_receive(), None);
    }
}
