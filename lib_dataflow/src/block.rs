//! # Block Capabilities
//!
//! Blocks are not arranged in a class hierarchy. Instead every block kind
//! implements the capability traits that apply to it:
//!
//! - **[`Block`]**: anything with a lifecycle (`complete`, `fault`, `completion`).
//! - **[`Target<T>`]**: anything that accepts `T` messages, either from callers
//!   (`post`, `send`) or from linked sources (`offer`).
//! - **[`Source<T>`]**: anything that produces `T` messages and can be linked
//!   to targets, or drained directly with `receive`.
//!
//! All three traits are object safe. Links store their target as
//! `Arc<dyn Target<T>>`, which is how one graph mixes block kinds freely.
//! Suspending operations return boxed futures so they stay callable through a
//! trait object.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::core::status::Completion;
use crate::error::DataflowError;
use crate::link::{LinkHandle, LinkOptions};

/// # Offer Status
///
/// The answer of a target to a source's offer. Refusals hand the value back.
#[derive(Debug)]
pub enum OfferStatus<T> {
    /// The target took the value.
    Accepted,
    /// The target is full. The source's wake handle was registered and will
    /// be notified when room frees up.
    Postponed(T),
    /// The target no longer accepts anything.
    Declined(T),
}

impl<T> OfferStatus<T> {
    /// `true` for [`OfferStatus::Accepted`].
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// # Block
///
/// Lifecycle shared by every block.
pub trait Block: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Stops accepting input and lets the block drain to `Completed`.
    fn complete(&self);

    /// Moves the block to `Faulted` right away, discarding queued and
    /// in-flight work.
    fn fault(&self, error: DataflowError);

    /// A handle resolving when the block reaches a terminal state.
    fn completion(&self) -> Completion;
}

/// # Target
///
/// The input side of a block.
pub trait Target<T>: Block {
    /// Non-blocking enqueue. `false` when full or no longer accepting.
    fn post(&self, value: T) -> bool {
        self.try_post(value).is_ok()
    }

    /// Non-blocking enqueue reporting why it failed.
    fn try_post(&self, value: T) -> Result<(), DataflowError>;

    /// Enqueue, waiting for capacity. Resolves `false` if the block stops
    /// accepting while the caller waits. Waiters are served first come,
    /// first served.
    fn send(&self, value: T) -> BoxFuture<'_, bool>;

    /// Like [`Target::send`], but gives up (resolving `false`) as soon as
    /// `cancel` fires. Cancelling never faults the block.
    fn send_with_cancellation(&self, value: T, cancel: CancellationToken) -> BoxFuture<'_, bool>;

    /// Source-to-target handoff. A full target keeps `waker` and notifies it
    /// when capacity frees up.
    fn offer(&self, value: T, waker: &Arc<Notify>) -> OfferStatus<T>;

    /// A completion-propagating link into this target was created.
    fn attach_upstream(&self);

    /// A completion-propagating link into this target was removed.
    fn detach_upstream(&self);

    /// A completion-propagating source completed. The target completes once
    /// every such source did.
    fn upstream_completed(&self);
}

/// # Source
///
/// The output side of a block.
pub trait Source<T>: Block {
    /// Registers a link to `target`. Messages are offered to links in the
    /// order they were registered.
    fn link_to(
        &self,
        target: Arc<dyn Target<T>>,
        options: LinkOptions<T>,
    ) -> Result<LinkHandle, DataflowError>;

    /// Takes the next undelivered output without waiting.
    fn try_receive(&self) -> Option<T>;

    /// Waits for the next output. Resolves `None` once the block is
    /// terminal and nothing is left to hand out.
    fn receive(&self) -> BoxFuture<'_, Option<T>>;

    /// Number of outputs produced but not yet handed off.
    fn output_count(&self) -> usize;
}

/// Links `source` to `target`; the free-function form of [`Source::link_to`].
pub fn link<T, S>(
    source: &S,
    target: Arc<dyn Target<T>>,
    options: LinkOptions<T>,
) -> Result<LinkHandle, DataflowError>
where
    S: Source<T> + ?Sized,
{
    source.link_to(target, options)
}
