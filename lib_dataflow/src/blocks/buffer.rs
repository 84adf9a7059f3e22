//! # Buffer Block
//!
//! Forwards every message unchanged. Messages nobody accepts stay in the
//! block and keep counting against its capacity, so a bounded buffer in front
//! of a slow consumer pushes back on its producers.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;

use crate::core::worker::{spawn_pool, PoolConfig};
use crate::core::{block_name, impl_core_source, impl_core_target, BlockCore};
use crate::error::DataflowError;
use crate::options::ExecutionOptions;

/// # Buffer Block
///
/// Only `bounded_capacity` and `name` of the options are used; forwarding is
/// always sequential and ordered.
pub struct BufferBlock<T> {
    core: BlockCore<T, T>,
}

impl<T: Send + 'static> BufferBlock<T> {
    /// Creates the block and starts its worker.
    pub fn new(options: ExecutionOptions) -> Result<Arc<Self>, DataflowError> {
        options.validate()?;
        let core = BlockCore::with_output(block_name("buffer", &options.name), options.bounded_capacity);
        spawn_pool(
            Arc::clone(&core.input),
            core.output.clone(),
            PoolConfig {
                parallelism: 1,
                ensure_ordered: true,
            },
            |value: T| async move { Ok(vec![value]) },
        );
        log::debug!("Created buffer block '{}'", core.name());
        Ok(Arc::new(Self { core }))
    }

    /// Messages waiting in the block, not counting ones already handed to the
    /// output side.
    pub fn input_count(&self) -> usize {
        self.core.input_count()
    }
}

impl_core_target!(BufferBlock<T>, T);
impl_core_source!(BufferBlock<T>, T);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, Source, Target};

    #[tokio::test]
    async fn forwards_in_fifo_order_to_receivers() {
        let buffer = BufferBlock::new(ExecutionOptions::default()).unwrap();
        for i in 0..5 {
            assert!(buffer.post(i));
        }
        buffer.complete();
        let mut seen = Vec::new();
        while let Some(value) = buffer.receive().await {
            seen.push(value);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(buffer.completion().await.is_ok());
    }

    #[tokio::test]
    async fn undelivered_messages_hold_capacity() {
        let buffer = BufferBlock::new(ExecutionOptions::default().with_capacity(2)).unwrap();
        assert!(buffer.post(1));
        assert!(buffer.post(2));
        assert!(!buffer.post(3));
        assert_eq!(buffer.receive().await, Some(1));
        assert!(buffer.post(3));
    }
}
