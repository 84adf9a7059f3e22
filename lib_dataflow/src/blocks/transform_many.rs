//! # TransformMany Block
//!
//! Like [`TransformBlock`](crate::TransformBlock), but each input may yield
//! any number of outputs. The outputs of one input are offered one by one and
//! in the order the function returned them; an empty result simply frees the
//! input's capacity slot.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::future::Future;
use std::sync::Arc;

use crate::core::worker::{spawn_pool, PoolConfig};
use crate::core::{block_name, impl_core_source, impl_core_target, BlockCore};
use crate::error::DataflowError;
use crate::options::ExecutionOptions;

/// # TransformMany Block
pub struct TransformManyBlock<T, R> {
    core: BlockCore<T, R>,
}

impl<T: Send + 'static, R: Send + 'static> TransformManyBlock<T, R> {
    /// Creates the block around an async one-to-many function.
    pub fn new<F, Fut>(options: ExecutionOptions, transform: F) -> Result<Arc<Self>, DataflowError>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<R>>> + Send + 'static,
    {
        options.validate()?;
        let core = BlockCore::with_output(
            block_name("transform-many", &options.name),
            options.bounded_capacity,
        );
        spawn_pool(
            Arc::clone(&core.input),
            core.output.clone(),
            PoolConfig {
                parallelism: options.max_degree_of_parallelism,
                ensure_ordered: options.ensure_ordered,
            },
            transform,
        );
        log::debug!("Created transform-many block '{}'", core.name());
        Ok(Arc::new(Self { core }))
    }

    /// Creates the block around a synchronous one-to-many function.
    pub fn from_fn<F>(options: ExecutionOptions, transform: F) -> Result<Arc<Self>, DataflowError>
    where
        F: Fn(T) -> anyhow::Result<Vec<R>> + Send + Sync + 'static,
    {
        Self::new(options, move |value| std::future::ready(transform(value)))
    }

    /// Messages waiting to be transformed.
    pub fn input_count(&self) -> usize {
        self.core.input_count()
    }
}

impl_core_target!(TransformManyBlock<T, R>, T);
impl_core_source!(TransformManyBlock<T, R>, R);
