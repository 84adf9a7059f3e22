//! # Block State Machine and Completion
//!
//! Every block owns one [`BlockStatus`], a `tokio::sync::watch` channel
//! holding its [`BlockState`]. The watch channel gives two things at once:
//!
//! - **Monotone transitions**: all writes go through `send_if_modified`, which
//!   refuses to leave a terminal state, so `Completed`/`Faulted` are final.
//! - **Many observers**: [`Completion`] wraps a watch receiver; any number of
//!   clones can await the terminal state without coordinating.
//!
//! The status also counts the completion-propagating upstream links of the
//! block so that a target fed by several sources completes only after the
//! last of them.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Mutex;

use tokio::sync::watch;

use crate::error::DataflowError;

/// # Block State
#[derive(Debug, Clone)]
pub enum BlockState {
    /// Accepting new messages.
    Accepting,
    /// `complete()` was called; draining what is left.
    Completing,
    /// Terminal: everything accepted was processed and handed off.
    Completed,
    /// Terminal: a fault stopped the block.
    Faulted(DataflowError),
}

impl BlockState {
    /// `true` for `Completed` and `Faulted`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Faulted(_))
    }
}

#[derive(Debug, Default)]
struct UpstreamLinks {
    pending: usize,
    any_completed: bool,
}

/// Shared state machine of one block.
#[derive(Debug)]
pub(crate) struct BlockStatus {
    name: String,
    state: watch::Sender<BlockState>,
    upstream: Mutex<UpstreamLinks>,
}

impl BlockStatus {
    pub(crate) fn new(name: String) -> Self {
        let (state, _) = watch::channel(BlockState::Accepting);
        Self {
            name,
            state,
            upstream: Mutex::new(UpstreamLinks::default()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> BlockState {
        self.state.borrow().clone()
    }

    pub(crate) fn is_accepting(&self) -> bool {
        matches!(*self.state.borrow(), BlockState::Accepting)
    }

    pub(crate) fn is_faulted(&self) -> bool {
        matches!(*self.state.borrow(), BlockState::Faulted(_))
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    pub(crate) fn fault_error(&self) -> Option<DataflowError> {
        match &*self.state.borrow() {
            BlockState::Faulted(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Accepting -> Completing. Returns `true` if this call made the transition.
    pub(crate) fn begin_completing(&self) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(state, BlockState::Accepting) {
                *state = BlockState::Completing;
                true
            } else {
                false
            }
        })
    }

    /// Any non-terminal state -> Completed.
    pub(crate) fn set_completed(&self) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = BlockState::Completed;
                true
            }
        });
        if changed {
            log::debug!("Block '{}' completed", self.name);
        }
        changed
    }

    /// Any non-terminal state -> Faulted. Returns `true` if this call faulted the block.
    pub(crate) fn set_faulted(&self, error: DataflowError) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = BlockState::Faulted(error.clone());
                true
            }
        });
        if changed {
            log::warn!("Block '{}' faulted: {}", self.name, error);
        }
        changed
    }

    pub(crate) fn completion(&self) -> Completion {
        Completion {
            name: self.name.clone(),
            rx: self.state.subscribe(),
        }
    }

    /// A completion-propagating link into this block was registered.
    pub(crate) fn attach_upstream(&self) {
        let mut upstream = self.upstream.lock().expect("upstream lock poisoned");
        upstream.pending += 1;
    }

    /// A propagating link went away without completing. Returns `true` when
    /// the block should now complete: no propagating source is left and at
    /// least one of them already completed.
    pub(crate) fn detach_upstream(&self) -> bool {
        let mut upstream = self.upstream.lock().expect("upstream lock poisoned");
        upstream.pending = upstream.pending.saturating_sub(1);
        upstream.pending == 0 && upstream.any_completed
    }

    /// A propagating source completed. Returns `true` when it was the last one.
    pub(crate) fn upstream_completed(&self) -> bool {
        let mut upstream = self.upstream.lock().expect("upstream lock poisoned");
        upstream.pending = upstream.pending.saturating_sub(1);
        upstream.any_completed = true;
        upstream.pending == 0
    }
}

/// # Completion
///
/// A cloneable, single-fire view of a block's terminal state. Awaiting it
/// resolves `Ok(())` once the block completed and `Err` once it faulted:
///
/// ```rust,no_run
/// # async fn demo(block: std::sync::Arc<lib_dataflow::BufferBlock<u32>>) -> Result<(), lib_dataflow::DataflowError> {
/// use lib_dataflow::Block;
///
/// block.complete();
/// block.completion().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Completion {
    name: String,
    rx: watch::Receiver<BlockState>,
}

impl Completion {
    /// Name of the observed block.
    pub fn block_name(&self) -> &str {
        &self.name
    }

    /// The state right now, without waiting.
    pub fn state(&self) -> BlockState {
        self.rx.borrow().clone()
    }

    /// `true` once the block reached `Completed` or `Faulted`.
    pub fn is_terminal(&self) -> bool {
        self.rx.borrow().is_terminal()
    }

    /// Waits for the terminal state.
    pub async fn wait(mut self) -> Result<(), DataflowError> {
        let outcome = self.rx.wait_for(BlockState::is_terminal).await;
        match outcome {
            Ok(state) => match &*state {
                BlockState::Faulted(error) => Err(error.clone()),
                _ => Ok(()),
            },
            // The status outlives every task that could still change it, so
            // a dropped sender means the block was dropped mid-flight.
            Err(_) => Err(DataflowError::faulted(anyhow::anyhow!(
                "block '{}' was dropped before completing",
                self.name
            ))),
        }
    }
}

impl IntoFuture for Completion {
    type Output = Result<(), DataflowError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_final() {
        let status = BlockStatus::new("t".into());
        assert!(status.is_accepting());
        assert!(status.begin_completing());
        assert!(!status.begin_completing());
        assert!(status.set_completed());
        assert!(!status.set_faulted(DataflowError::faulted(anyhow::anyhow!("late"))));
        assert!(matches!(status.state(), BlockState::Completed));
    }

    #[test]
    fn fault_from_accepting() {
        let status = BlockStatus::new("t".into());
        assert!(status.set_faulted(DataflowError::faulted(anyhow::anyhow!("boom"))));
        assert!(status.is_faulted());
        assert!(!status.set_completed());
        assert!(status.fault_error().is_some());
    }

    #[test]
    fn upstream_completes_after_last_source() {
        let status = BlockStatus::new("t".into());
        status.attach_upstream();
        status.attach_upstream();
        assert!(!status.upstream_completed());
        assert!(status.upstream_completed());
    }

    #[test]
    fn detaching_last_pending_source_completes_only_after_a_completion() {
        let status = BlockStatus::new("t".into());
        status.attach_upstream();
        assert!(!status.detach_upstream());

        status.attach_upstream();
        status.attach_upstream();
        assert!(!status.upstream_completed());
        assert!(status.detach_upstream());
    }

    #[tokio::test]
    async fn completion_resolves_for_every_observer() {
        let status = BlockStatus::new("t".into());
        let first = status.completion();
        let second = status.completion();
        assert_eq!(first.block_name(), "t");
        status.set_faulted(DataflowError::faulted(anyhow::anyhow!("boom")));
        assert!(first.await.is_err());
        assert!(second.await.is_err());
        assert!(status.completion().is_terminal());
    }
}
