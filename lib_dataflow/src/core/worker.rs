//! # Worker Pool
//!
//! Runs a block's behavior function over its input queue with a bounded
//! degree of parallelism. A single coordinator task per block dequeues
//! messages and spawns one tokio task per message into a `JoinSet`, never
//! more than `max_degree_of_parallelism` at once.
//!
//! ## Result Handling
//!
//! - **Ordered**: results are parked in a [`ReorderBuffer`] under the input
//!   sequence number and handed to the output port strictly in input order.
//! - **Unordered**: results go to the output port as soon as they finish.
//! - **Errors and panics**: the first failure faults the block; the remaining
//!   in-flight tasks are aborted and their results are never published.
//!
//! When the block stops accepting and the queue and the pool are empty, the
//! coordinator finishes the output port (or, for terminal blocks without one,
//! marks the block completed directly).

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::future::Future;
use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};

use crate::core::input::InputQueue;
use crate::core::output::OutputPort;
use crate::core::reorder::ReorderBuffer;
use crate::core::{fault_block, panic_message};
use crate::error::DataflowError;

/// Sizing of one block's pool.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolConfig {
    pub(crate) parallelism: usize,
    pub(crate) ensure_ordered: bool,
}

type Finished<O> = (u64, anyhow::Result<Vec<O>>);

/// Spawns the coordinator task of a worker block.
pub(crate) fn spawn_pool<I, O, F, Fut>(
    input: Arc<InputQueue<I>>,
    output: Option<Arc<OutputPort<O>>>,
    config: PoolConfig,
    behavior: F,
) where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<O>>> + Send + 'static,
{
    tokio::spawn(run_pool(input, output, config, Arc::new(behavior)));
}

async fn run_pool<I, O, F, Fut>(
    input: Arc<InputQueue<I>>,
    output: Option<Arc<OutputPort<O>>>,
    config: PoolConfig,
    behavior: Arc<F>,
) where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<O>>> + Send + 'static,
{
    let status = Arc::clone(input.status());
    let mut in_flight: JoinSet<Finished<O>> = JoinSet::new();
    let mut reorder = ReorderBuffer::new();

    loop {
        if status.is_faulted() {
            in_flight.abort_all();
            return;
        }

        while in_flight.len() < config.parallelism {
            let Some(message) = input.try_dequeue() else {
                break;
            };
            let (seq, payload) = message.into_parts();
            let behavior = Arc::clone(&behavior);
            in_flight.spawn(async move { (seq, (behavior.as_ref())(payload).await) });
        }

        if in_flight.is_empty() {
            if !status.is_accepting() && input.is_empty() {
                break;
            }
            input.available().notified().await;
            continue;
        }

        tokio::select! {
            joined = in_flight.join_next() => {
                let Some(joined) = joined else { continue };
                match settle(joined) {
                    Ok(_) if status.is_faulted() => {}
                    Ok((seq, outputs)) => {
                        let ready = if config.ensure_ordered {
                            reorder.insert(seq, outputs)
                        } else {
                            vec![outputs]
                        };
                        for group in ready {
                            match &output {
                                Some(port) => port.push_group(group, 1),
                                None => input.release(1),
                            }
                        }
                    }
                    Err(error) => {
                        in_flight.abort_all();
                        let wake = output.as_ref().map(|port| move || port.wake());
                        fault_block(&input, error, wake);
                        return;
                    }
                }
            }
            // Also fires on close, so a fault aborts the pool promptly.
            _ = input.available().notified() => {}
        }
    }

    match output {
        Some(port) => port.finish(),
        None => {
            status.set_completed();
        }
    }
}

fn settle<O>(joined: Result<Finished<O>, JoinError>) -> Result<(u64, Vec<O>), DataflowError> {
    match joined {
        Ok((seq, Ok(outputs))) => Ok((seq, outputs)),
        Ok((_, Err(error))) => Err(DataflowError::from(error)),
        Err(join_error) if join_error.is_panic() => Err(DataflowError::faulted(anyhow::anyhow!(
            "behavior panicked: {}",
            panic_message(join_error.into_panic().as_ref())
        ))),
        Err(join_error) => Err(DataflowError::faulted(anyhow::anyhow!(
            "behavior task was cancelled: {}",
            join_error
        ))),
    }
}

