//! # Action Block
//!
//! The terminal block of a pipeline. Runs a user sink for every message and
//! produces nothing; it therefore implements [`Target`](crate::Target) only.
//! A message keeps its capacity slot until the sink call for it returned, and
//! the block completes once the queue is empty and every sink call finished.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::future::Future;
use std::sync::Arc;

use crate::core::worker::{spawn_pool, PoolConfig};
use crate::core::{block_name, impl_core_target, BlockCore};
use crate::error::DataflowError;
use crate::options::ExecutionOptions;

/// # Action Block
pub struct ActionBlock<T> {
    core: BlockCore<T, ()>,
}

impl<T: Send + 'static> ActionBlock<T> {
    /// Creates the block around an async sink.
    pub fn new<F, Fut>(options: ExecutionOptions, sink: F) -> Result<Arc<Self>, DataflowError>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        options.validate()?;
        let core = BlockCore::terminal(block_name("action", &options.name), options.bounded_capacity);
        spawn_pool(
            Arc::clone(&core.input),
            None,
            PoolConfig {
                parallelism: options.max_degree_of_parallelism,
                ensure_ordered: false,
            },
            move |value: T| {
                let done = sink(value);
                async move { done.await.map(|()| Vec::<()>::new()) }
            },
        );
        log::debug!(
            "Created action block '{}' (parallelism {})",
            core.name(),
            options.max_degree_of_parallelism
        );
        Ok(Arc::new(Self { core }))
    }

    /// Creates the block around a synchronous sink. The sink still runs on a
    /// tokio worker task, so it should not block for long.
    pub fn from_fn<F>(options: ExecutionOptions, sink: F) -> Result<Arc<Self>, DataflowError>
    where
        F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(options, move |value| std::future::ready(sink(value)))
    }

    /// Messages waiting for a sink call.
    pub fn input_count(&self) -> usize {
        self.core.input_count()
    }
}

impl_core_target!(ActionBlock<T>, T);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, Target};
    use std::sync::Mutex;

    #[tokio::test]
    async fn runs_the_sink_for_every_message_before_completing() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            ActionBlock::from_fn(ExecutionOptions::default(), move |x: u32| {
                seen.lock().unwrap().push(x);
                Ok(())
            })
            .unwrap()
        };
        for i in 0..10 {
            assert!(sink.send(i).await);
        }
        sink.complete();
        sink.completion().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn sink_error_faults_the_block() {
        let sink = ActionBlock::from_fn(ExecutionOptions::default(), |x: u32| {
            anyhow::ensure!(x != 3, "refusing {}", x);
            Ok(())
        })
        .unwrap();
        for i in 0..5 {
            sink.post(i);
        }
        let outcome = sink.completion().await;
        assert!(matches!(outcome, Err(DataflowError::Faulted(_))));
        assert!(!sink.post(10));
    }
}
