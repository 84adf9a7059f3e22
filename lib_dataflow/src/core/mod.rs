//! # Block Core
//!
//! The machinery every block kind is assembled from:
//!
//! - [`status`]: the state machine and the completion handle.
//! - [`input`]: the bounded FIFO input queue with `post`/`send`/`offer`.
//! - [`worker`]: the parallel worker pool driving a behavior function.
//! - [`reorder`]: the min-sequence buffer behind `ensure_ordered`.
//! - [`output`]: the single-consumer output port and its delivery loop.
//!
//! [`BlockCore`] bundles one input queue with an optional output port and
//! implements the target and source plumbing the worker blocks share.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub(crate) mod input;
pub(crate) mod output;
pub(crate) mod reorder;
pub mod status;
pub(crate) mod worker;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::block::{OfferStatus, Target};
use crate::error::DataflowError;
use crate::link::{LinkHandle, LinkOptions};

use self::input::InputQueue;
use self::output::OutputPort;
use self::status::{BlockStatus, Completion};

static NEXT_BLOCK_ID: AtomicU64 = AtomicU64::new(1);

/// The configured name, or `<kind>-<n>` with a process-wide counter.
pub(crate) fn block_name(kind: &str, name: &Option<String>) -> String {
    match name {
        Some(name) => name.clone(),
        None => format!("{}-{}", kind, NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed)),
    }
}

/// Text of a panic payload, for the fault it turns into.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs a user callback that executes outside the worker pool (link
/// predicates, clone functions). A panic becomes a fault error instead of
/// unwinding through engine code.
pub(crate) fn guarded<R>(what: &str, callback: impl FnOnce() -> R) -> Result<R, DataflowError> {
    panic::catch_unwind(AssertUnwindSafe(callback)).map_err(|payload| {
        DataflowError::faulted(anyhow::anyhow!(
            "{} panicked: {}",
            what,
            panic_message(payload.as_ref())
        ))
    })
}

/// Faults the block owning `input`: the queue is closed and emptied, and
/// `wake` is called so the block's output side can notice. Returns `false`
/// if the block was already terminal.
pub(crate) fn fault_block<T, W>(input: &InputQueue<T>, error: DataflowError, wake: Option<W>) -> bool
where
    W: FnOnce(),
{
    if !input.status().set_faulted(error) {
        return false;
    }
    input.close();
    let dropped = input.clear();
    if dropped > 0 {
        log::debug!(
            "Block '{}' discarded {} queued message(s) on fault",
            input.status().name(),
            dropped
        );
    }
    if let Some(wake) = wake {
        wake();
    }
    true
}

/// Accepting -> Completing, then closes the input so waiting senders are
/// refused and the worker notices the drain condition.
pub(crate) fn complete_block<T>(input: &InputQueue<T>) {
    if input.status().begin_completing() {
        log::debug!("Block '{}' completing", input.status().name());
        input.close();
    }
}

/// Input queue plus optional output port of one worker block.
pub(crate) struct BlockCore<I, O> {
    pub(crate) input: Arc<InputQueue<I>>,
    pub(crate) output: Option<Arc<OutputPort<O>>>,
}

impl<I, O> BlockCore<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// A core whose outputs are released back into its own input capacity.
    pub(crate) fn with_output(name: String, capacity: Option<usize>) -> Self {
        let status = Arc::new(BlockStatus::new(name));
        let input = Arc::new(InputQueue::new(Arc::clone(&status), capacity));
        let releaser = Arc::clone(&input);
        let faulter = Arc::clone(&input);
        let output = OutputPort::start(
            status,
            Box::new(move |units| releaser.release(units)),
            Box::new(move |error| {
                fault_block(&faulter, error, None::<fn()>);
            }),
        );
        Self {
            input,
            output: Some(output),
        }
    }

    /// A core for terminal blocks.
    pub(crate) fn terminal(name: String, capacity: Option<usize>) -> Self {
        let status = Arc::new(BlockStatus::new(name));
        Self {
            input: Arc::new(InputQueue::new(status, capacity)),
            output: None,
        }
    }

    pub(crate) fn status(&self) -> &Arc<BlockStatus> {
        self.input.status()
    }

    pub(crate) fn name(&self) -> &str {
        self.status().name()
    }

    pub(crate) fn complete(&self) {
        complete_block(&self.input);
    }

    pub(crate) fn fault(&self, error: DataflowError) {
        let wake = self.output.as_ref().map(|port| move || port.wake());
        fault_block(&self.input, error, wake);
    }

    pub(crate) fn completion(&self) -> Completion {
        self.status().completion()
    }

    pub(crate) fn try_post(&self, value: I) -> Result<(), DataflowError> {
        self.input.try_post(value).map_err(|(_, error)| error)
    }

    pub(crate) async fn send(&self, value: I, cancel: Option<&CancellationToken>) -> bool {
        self.input.send(value, cancel).await
    }

    pub(crate) fn offer(&self, value: I, waker: &Arc<Notify>) -> OfferStatus<I> {
        self.input.offer(value, waker)
    }

    pub(crate) fn attach_upstream(&self) {
        self.status().attach_upstream();
    }

    pub(crate) fn detach_upstream(&self) {
        if self.status().detach_upstream() {
            self.complete();
        }
    }

    pub(crate) fn upstream_completed(&self) {
        if self.status().upstream_completed() {
            self.complete();
        }
    }

    pub(crate) fn input_count(&self) -> usize {
        self.input.len()
    }

    fn port(&self) -> Option<&Arc<OutputPort<O>>> {
        self.output.as_ref()
    }

    pub(crate) fn link(
        &self,
        target: Arc<dyn Target<O>>,
        options: LinkOptions<O>,
    ) -> Result<LinkHandle, DataflowError> {
        match self.port() {
            Some(port) => port.link(target, options),
            None => Err(DataflowError::InvalidOptions(format!(
                "block '{}' has no output to link from",
                self.name()
            ))),
        }
    }

    pub(crate) fn try_receive(&self) -> Option<O> {
        self.port()?.try_receive()
    }

    pub(crate) async fn receive(&self) -> Option<O> {
        match self.port() {
            Some(port) => port.receive().await,
            None => None,
        }
    }

    pub(crate) fn output_count(&self) -> usize {
        self.port().map_or(0, |port| port.len())
    }
}

/// Implements [`Block`](crate::Block) and [`Target`] for a block type with a
/// `core: BlockCore<$input, _>` field.
macro_rules! impl_core_target {
    ($block:ident < $($param:ident),* >, $input:ty) => {
        impl<$($param: Send + 'static),*> $crate::block::Block for $block<$($param),*> {
            fn name(&self) -> &str {
                self.core.name()
            }

            fn complete(&self) {
                self.core.complete();
            }

            fn fault(&self, error: $crate::error::DataflowError) {
                self.core.fault(error);
            }

            fn completion(&self) -> $crate::core::status::Completion {
                self.core.completion()
            }
        }

        impl<$($param: Send + 'static),*> $crate::block::Target<$input> for $block<$($param),*> {
            fn try_post(&self, value: $input) -> Result<(), $crate::error::DataflowError> {
                self.core.try_post(value)
            }

            fn send(&self, value: $input) -> ::futures_util::future::BoxFuture<'_, bool> {
                Box::pin(self.core.send(value, None))
            }

            fn send_with_cancellation(
                &self,
                value: $input,
                cancel: ::tokio_util::sync::CancellationToken,
            ) -> ::futures_util::future::BoxFuture<'_, bool> {
                Box::pin(async move { self.core.send(value, Some(&cancel)).await })
            }

            fn offer(
                &self,
                value: $input,
                waker: &::std::sync::Arc<::tokio::sync::Notify>,
            ) -> $crate::block::OfferStatus<$input> {
                self.core.offer(value, waker)
            }

            fn attach_upstream(&self) {
                self.core.attach_upstream();
            }

            fn detach_upstream(&self) {
                self.core.detach_upstream();
            }

            fn upstream_completed(&self) {
                self.core.upstream_completed();
            }
        }
    };
}

/// Implements [`Source`](crate::Source) for a block type whose `core` has an
/// output port.
macro_rules! impl_core_source {
    ($block:ident < $($param:ident),* >, $output:ty) => {
        impl<$($param: Send + 'static),*> $crate::block::Source<$output> for $block<$($param),*> {
            fn link_to(
                &self,
                target: ::std::sync::Arc<dyn $crate::block::Target<$output>>,
                options: $crate::link::LinkOptions<$output>,
            ) -> Result<$crate::link::LinkHandle, $crate::error::DataflowError> {
                self.core.link(target, options)
            }

            fn try_receive(&self) -> Option<$output> {
                self.core.try_receive()
            }

            fn receive(&self) -> ::futures_util::future::BoxFuture<'_, Option<$output>> {
                Box::pin(self.core.receive())
            }

            fn output_count(&self) -> usize {
                self.core.output_count()
            }
        }
    };
}

pub(crate) use impl_core_source;
pub(crate) use impl_core_target;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_turns_a_panic_into_a_fault() {
        assert_eq!(guarded("callback", || 5).unwrap(), 5);
        let err = guarded("callback", || -> u8 { panic!("bad input {}", 7) }).unwrap_err();
        assert!(matches!(err, DataflowError::Faulted(_)));
        assert!(err.to_string().contains("callback panicked: bad input 7"));
    }
}
