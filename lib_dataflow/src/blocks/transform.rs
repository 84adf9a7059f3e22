//! # Transform Block
//!
//! Applies `T -> R` to each message. With `max_degree_of_parallelism > 1`
//! several messages are processed at once:
//!
//! - `ensure_ordered = true` (default): results leave in input order.
//! - `ensure_ordered = false`: results leave as soon as they are ready.
//!
//! A failing or panicking transform faults the block.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::future::Future;
use std::sync::Arc;

use crate::core::worker::{spawn_pool, PoolConfig};
use crate::core::{block_name, impl_core_source, impl_core_target, BlockCore};
use crate::error::DataflowError;
use crate::options::ExecutionOptions;

/// # Transform Block
pub struct TransformBlock<T, R> {
    core: BlockCore<T, R>,
}

impl<T: Send + 'static, R: Send + 'static> TransformBlock<T, R> {
    /// Creates the block around an async transform.
    pub fn new<F, Fut>(options: ExecutionOptions, transform: F) -> Result<Arc<Self>, DataflowError>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        options.validate()?;
        let core = BlockCore::with_output(
            block_name("transform", &options.name),
            options.bounded_capacity,
        );
        spawn_pool(
            Arc::clone(&core.input),
            core.output.clone(),
            PoolConfig {
                parallelism: options.max_degree_of_parallelism,
                ensure_ordered: options.ensure_ordered,
            },
            move |value: T| {
                let result = transform(value);
                async move { result.await.map(|r| vec![r]) }
            },
        );
        log::debug!(
            "Created transform block '{}' (parallelism {}, ordered {})",
            core.name(),
            options.max_degree_of_parallelism,
            options.ensure_ordered
        );
        Ok(Arc::new(Self { core }))
    }

    /// Creates the block around a synchronous transform.
    pub fn from_fn<F>(options: ExecutionOptions, transform: F) -> Result<Arc<Self>, DataflowError>
    where
        F: Fn(T) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        Self::new(options, move |value| std::future::ready(transform(value)))
    }

    /// Messages waiting to be transformed.
    pub fn input_count(&self) -> usize {
        self.core.input_count()
    }
}

impl_core_target!(TransformBlock<T, R>, T);
impl_core_source!(TransformBlock<T, R>, R);
