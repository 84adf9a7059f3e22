//! # Join Blocks
//!
//! Fan-in: each join owns several input targets and emits one combined
//! message whenever every target holds at least one item. The oldest item of
//! each target is taken, so items are paired strictly in arrival order.
//!
//! - [`JoinBlock<A, B>`] pairs two differently typed inputs into `(A, B)`.
//! - [`JoinManyBlock<T>`] combines `N >= 2` inputs of one type into a `Vec<T>`
//!   in target order.
//!
//! ## Targets
//!
//! Every target is an independent [`JoinTarget<T>`] with its own bounded queue
//! and lifecycle, so sources link to the targets rather than to the join. An
//! item keeps its target's capacity slot until the combined message holding
//! it left the join.
//!
//! ## Completion
//!
//! Completing the join completes all of its targets. The join finishes once
//! every target stopped accepting and no further combination can form. Items
//! left over at that point are handled by [`UnpairedPolicy`]. A fault in any
//! target faults the whole join, and the other way round.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::block::{Block, OfferStatus, Source, Target};
use crate::core::input::InputQueue;
use crate::core::output::OutputPort;
use crate::core::status::{BlockStatus, Completion};
use crate::core::{block_name, complete_block, fault_block};
use crate::error::DataflowError;
use crate::link::{LinkHandle, LinkOptions};
use crate::options::{JoinOptions, UnpairedPolicy};

/// The type-erased view the join worker has of one of its targets.
trait JoinInput: Send + Sync {
    fn status(&self) -> &Arc<BlockStatus>;
    fn len(&self) -> usize;
    fn release(&self, units: usize);
    fn complete(&self);
    fn fault(&self, error: DataflowError);
    fn clear(&self) -> usize;
}

impl<T: Send + 'static> JoinInput for InputQueue<T> {
    fn status(&self) -> &Arc<BlockStatus> {
        InputQueue::status(self)
    }

    fn len(&self) -> usize {
        InputQueue::len(self)
    }

    fn release(&self, units: usize) {
        InputQueue::release(self, units);
    }

    fn complete(&self) {
        complete_block(self);
    }

    fn fault(&self, error: DataflowError) {
        fault_block(self, error, None::<fn()>);
    }

    fn clear(&self) -> usize {
        InputQueue::clear(self)
    }
}

/// State shared by the join shell, its worker and its targets.
struct JoinShared<O> {
    status: Arc<BlockStatus>,
    inputs: Vec<Arc<dyn JoinInput>>,
    port: Arc<OutputPort<O>>,
    /// Fired by every target on arrival and on state changes.
    signal: Arc<Notify>,
    policy: UnpairedPolicy,
}

impl<O: Send + 'static> JoinShared<O> {
    fn complete(&self) {
        if self.status.begin_completing() {
            log::debug!("Join block '{}' completing", self.status.name());
        }
        for input in &self.inputs {
            input.complete();
        }
        self.signal.notify_one();
    }

    fn fault(&self, error: DataflowError) {
        if self.status.set_faulted(error.clone()) {
            for input in &self.inputs {
                input.fault(error.clone());
            }
            self.port.wake();
        }
        self.signal.notify_one();
    }

    fn all_ready(&self) -> bool {
        self.inputs.iter().all(|input| input.len() > 0)
    }

    fn leftovers(&self) -> usize {
        self.inputs.iter().map(|input| input.len()).sum()
    }

    /// Emits combinations while every input holds an item.
    fn pair<F>(&self, take: &F)
    where
        F: Fn() -> Option<O>,
    {
        while self.all_ready() {
            match take() {
                Some(joined) => self.port.push(joined, 1),
                None => break,
            }
        }
    }

    /// Finishes the join once no target accepts anymore. Returns `false`
    /// while some target is still open.
    fn try_finish<F>(&self, take: &F) -> bool
    where
        F: Fn() -> Option<O>,
    {
        if self.inputs.iter().any(|input| input.status().is_accepting()) {
            return false;
        }
        // A post that passed its accepting check before the target closed
        // lands after our last pairing pass; the queues are final only now.
        self.pair(take);
        self.status.begin_completing();
        let leftover = self.leftovers();
        if leftover > 0 {
            match self.policy {
                UnpairedPolicy::Discard => {
                    log::warn!(
                        "Join block '{}' discarded {} unpaired item(s) on completion",
                        self.status.name(),
                        leftover
                    );
                    for input in &self.inputs {
                        input.clear();
                    }
                }
                UnpairedPolicy::Fault => {
                    self.fault(DataflowError::UnpairedOnCompletion {
                        block: self.status.name().to_string(),
                        leftover,
                    });
                    return true;
                }
            }
        }
        for input in &self.inputs {
            input.status().set_completed();
        }
        self.port.finish();
        true
    }

    /// `take` removes the oldest item of every input; it is only called when
    /// all of them are non-empty, and this worker is their only consumer.
    async fn run<F>(self: Arc<Self>, take: F)
    where
        F: Fn() -> Option<O> + Send + 'static,
    {
        loop {
            if let Some(error) = self.status.fault_error() {
                // Faulted from outside: make sure every target follows.
                self.fault(error);
                return;
            }
            let target_fault = self
                .inputs
                .iter()
                .find_map(|input| input.status().fault_error());
            if let Some(error) = target_fault {
                self.fault(error);
                return;
            }

            self.pair(&take);

            if self.try_finish(&take) {
                return;
            }
            self.signal.notified().await;
        }
    }
}

fn start_join<O, F>(
    name: String,
    inputs: Vec<Arc<dyn JoinInput>>,
    signal: Arc<Notify>,
    policy: UnpairedPolicy,
    take: F,
) -> Arc<JoinShared<O>>
where
    O: Send + 'static,
    F: Fn() -> Option<O> + Send + 'static,
{
    let status = Arc::new(BlockStatus::new(name));
    let releasers = inputs.clone();
    let faulters = inputs.clone();
    let fault_status = Arc::clone(&status);
    let port = OutputPort::start(
        Arc::clone(&status),
        Box::new(move |units| {
            for input in &releasers {
                input.release(units);
            }
        }),
        Box::new(move |error: DataflowError| {
            fault_status.set_faulted(error.clone());
            for input in &faulters {
                input.fault(error.clone());
            }
        }),
    );
    let shared = Arc::new(JoinShared {
        status,
        inputs,
        port,
        signal,
        policy,
    });
    tokio::spawn(Arc::clone(&shared).run(take));
    shared
}

/// # Join Target
///
/// One input of a join. Link sources to it or post into it directly.
pub struct JoinTarget<T> {
    input: Arc<InputQueue<T>>,
}

impl<T: Send + 'static> JoinTarget<T> {
    fn new(name: String, capacity: Option<usize>, signal: &Arc<Notify>) -> Arc<Self> {
        let status = Arc::new(BlockStatus::new(name));
        Arc::new(Self {
            input: Arc::new(InputQueue::with_signal(status, capacity, Arc::clone(signal))),
        })
    }

    fn erased(&self) -> Arc<dyn JoinInput> {
        Arc::clone(&self.input) as Arc<dyn JoinInput>
    }

    /// Items waiting for a partner.
    pub fn input_count(&self) -> usize {
        self.input.len()
    }
}

impl<T: Send + 'static> Block for JoinTarget<T> {
    fn name(&self) -> &str {
        self.input.status().name()
    }

    /// Stops this target only. The join finishes once all targets did.
    fn complete(&self) {
        complete_block(&self.input);
    }

    /// Faults this target, and with it the whole join.
    fn fault(&self, error: DataflowError) {
        fault_block(&self.input, error, None::<fn()>);
    }

    fn completion(&self) -> Completion {
        self.input.status().completion()
    }
}

impl<T: Send + 'static> Target<T> for JoinTarget<T> {
    fn try_post(&self, value: T) -> Result<(), DataflowError> {
        self.input.try_post(value).map_err(|(_, error)| error)
    }

    fn send(&self, value: T) -> BoxFuture<'_, bool> {
        Box::pin(self.input.send(value, None))
    }

    fn send_with_cancellation(&self, value: T, cancel: CancellationToken) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.input.send(value, Some(&cancel)).await })
    }

    fn offer(&self, value: T, waker: &Arc<Notify>) -> OfferStatus<T> {
        self.input.offer(value, waker)
    }

    fn attach_upstream(&self) {
        self.input.status().attach_upstream();
    }

    fn detach_upstream(&self) {
        if self.input.status().detach_upstream() {
            self.complete();
        }
    }

    fn upstream_completed(&self) {
        if self.input.status().upstream_completed() {
            self.complete();
        }
    }
}

/// # Join Block
///
/// Pairs `A`s from [`JoinBlock::target1`] with `B`s from
/// [`JoinBlock::target2`].
pub struct JoinBlock<A, B> {
    shared: Arc<JoinShared<(A, B)>>,
    target1: Arc<JoinTarget<A>>,
    target2: Arc<JoinTarget<B>>,
}

impl<A: Send + 'static, B: Send + 'static> JoinBlock<A, B> {
    /// Creates the join and starts its worker.
    pub fn new(options: JoinOptions) -> Result<Arc<Self>, DataflowError> {
        options.validate()?;
        let name = block_name("join", &options.name);
        let signal = Arc::new(Notify::new());
        let target1 = JoinTarget::new(format!("{}.target1", name), options.bounded_capacity, &signal);
        let target2 = JoinTarget::new(format!("{}.target2", name), options.bounded_capacity, &signal);

        let (first, second) = (Arc::clone(&target1.input), Arc::clone(&target2.input));
        let take = move || {
            let a = first.try_dequeue()?.into_payload();
            let b = second.try_dequeue()?.into_payload();
            Some((a, b))
        };
        let shared = start_join(
            name,
            vec![target1.erased(), target2.erased()],
            signal,
            options.unpaired,
            take,
        );
        log::debug!("Created join block '{}'", shared.status.name());
        Ok(Arc::new(Self {
            shared,
            target1,
            target2,
        }))
    }

    /// The first input.
    pub fn target1(&self) -> Arc<JoinTarget<A>> {
        Arc::clone(&self.target1)
    }

    /// The second input.
    pub fn target2(&self) -> Arc<JoinTarget<B>> {
        Arc::clone(&self.target2)
    }
}

/// # Join Many Block
///
/// Combines one `T` from each of its `target_count` inputs into a `Vec<T>`.
pub struct JoinManyBlock<T> {
    shared: Arc<JoinShared<Vec<T>>>,
    targets: Vec<Arc<JoinTarget<T>>>,
}

impl<T: Send + 'static> JoinManyBlock<T> {
    /// Creates a join over `target_count` inputs (at least 2).
    pub fn new(target_count: usize, options: JoinOptions) -> Result<Arc<Self>, DataflowError> {
        options.validate()?;
        if target_count < 2 {
            return Err(DataflowError::InvalidOptions(format!(
                "a join needs at least 2 targets, got {}",
                target_count
            )));
        }
        let name = block_name("join", &options.name);
        let signal = Arc::new(Notify::new());
        let targets: Vec<_> = (0..target_count)
            .map(|i| JoinTarget::new(format!("{}.target{}", name, i), options.bounded_capacity, &signal))
            .collect();

        let queues: Vec<Arc<InputQueue<T>>> = targets.iter().map(|t| Arc::clone(&t.input)).collect();
        let take = move || {
            queues
                .iter()
                .map(|queue| queue.try_dequeue().map(|m| m.into_payload()))
                .collect::<Option<Vec<T>>>()
        };
        let shared = start_join(
            name,
            targets.iter().map(|t| t.erased()).collect(),
            signal,
            options.unpaired,
            take,
        );
        log::debug!(
            "Created join block '{}' with {} targets",
            shared.status.name(),
            target_count
        );
        Ok(Arc::new(Self { shared, targets }))
    }

    /// Input `index`, or `None` past `target_count`.
    pub fn target(&self, index: usize) -> Option<Arc<JoinTarget<T>>> {
        self.targets.get(index).cloned()
    }

    /// Number of inputs.
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }
}

macro_rules! impl_join_block {
    ($block:ident < $($param:ident),* >, $output:ty) => {
        impl<$($param: Send + 'static),*> Block for $block<$($param),*> {
            fn name(&self) -> &str {
                self.shared.status.name()
            }

            /// Completes every target.
            fn complete(&self) {
                self.shared.complete();
            }

            fn fault(&self, error: DataflowError) {
                self.shared.fault(error);
            }

            fn completion(&self) -> Completion {
                self.shared.status.completion()
            }
        }

        impl<$($param: Send + 'static),*> Source<$output> for $block<$($param),*> {
            fn link_to(
                &self,
                target: Arc<dyn Target<$output>>,
                options: LinkOptions<$output>,
            ) -> Result<LinkHandle, DataflowError> {
                self.shared.port.link(target, options)
            }

            fn try_receive(&self) -> Option<$output> {
                self.shared.port.try_receive()
            }

            fn receive(&self) -> BoxFuture<'_, Option<$output>> {
                Box::pin(self.shared.port.receive())
            }

            fn output_count(&self) -> usize {
                self.shared.port.len()
            }
        }
    };
}

impl_join_block!(JoinBlock<A, B>, (A, B));
impl_join_block!(JoinManyBlock<T>, Vec<T>);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pairs_oldest_items_first() {
        let join = JoinBlock::<u32, &'static str>::new(JoinOptions::default()).unwrap();
        for i in 0..3 {
            join.target1().post(i);
        }
        join.target2().post("a");
        join.target2().post("b");
        join.complete();
        let mut pairs = Vec::new();
        while let Some(pair) = join.receive().await {
            pairs.push(pair);
        }
        assert_eq!(pairs, vec![(0, "a"), (1, "b")]);
        // The default policy discards the unpaired `2`.
        assert!(join.completion().await.is_ok());
        assert!(join.target1().completion().await.is_ok());
    }

    #[tokio::test]
    async fn fault_policy_reports_leftovers() {
        let join = JoinBlock::<u32, u32>::new(
            JoinOptions::default().with_unpaired(UnpairedPolicy::Fault),
        )
        .unwrap();
        join.target1().post(1);
        join.complete();
        let err = join.completion().await.unwrap_err();
        assert!(matches!(
            err,
            DataflowError::UnpairedOnCompletion { leftover: 1, .. }
        ));
        assert!(join.target2().completion().await.is_err());
    }

    #[tokio::test]
    async fn join_many_needs_two_targets() {
        assert!(JoinManyBlock::<u8>::new(1, JoinOptions::default()).is_err());
        let join = JoinManyBlock::<u8>::new(3, JoinOptions::default()).unwrap();
        assert!(join.target(3).is_none());
        for i in 0..3 {
            join.target(i).unwrap().post(i as u8);
        }
        assert_eq!(join.receive().await, Some(vec![0, 1, 2]));
    }
}
