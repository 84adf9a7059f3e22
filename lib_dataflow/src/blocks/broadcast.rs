//! # Broadcast Block
//!
//! Fan-out with overwrite semantics. Every value taken from the input is
//! copied into one slot per link; each slot holds at most one undelivered
//! value, and a newer value replaces an older one that its target did not
//! take yet. A slow target therefore never slows the block down, it simply
//! skips intermediate values and still ends up with the latest one.
//!
//! ## Latest Value
//!
//! The block remembers the last value it took in:
//!
//! - `receive`/`try_receive` return a copy of it without consuming anything.
//! - A target linked later is seeded with it, if its predicate agrees.
//!
//! Copies are made with `Clone::clone` unless a clone function is supplied
//! through [`BroadcastBlock::with_cloning`]. Clone functions and link
//! predicates never run under the slot lock; a panic in either faults the
//! block.
//!
//! ## Completion
//!
//! After `complete()`, the block finishes once its input is drained and every
//! slot was delivered (or dropped because its target declined).

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::block::{Block, OfferStatus, Source, Target};
use crate::core::input::InputQueue;
use crate::core::status::{BlockStatus, Completion};
use crate::core::{block_name, complete_block, fault_block, guarded};
use crate::error::DataflowError;
use crate::link::{LinkHandle, LinkOptions, LinkSet};
use crate::options::BroadcastOptions;

type CloneFn<T> = Arc<dyn Fn(&T) -> T + Send + Sync>;

struct Slots<T> {
    latest: Option<Arc<T>>,
    pending: HashMap<u64, T>,
    /// Links added since the worker last looked.
    unseeded: Vec<u64>,
}

struct Shared<T> {
    input: InputQueue<T>,
    links: Arc<LinkSet<T>>,
    slots: Mutex<Slots<T>>,
    clone_fn: CloneFn<T>,
    /// Input arrivals, link changes and freed target capacity all land here.
    wake: Arc<Notify>,
    /// Fired for `receive` callers when `latest` changes or the block ends.
    updated: Notify,
}

impl<T: Send + Sync + 'static> Shared<T> {
    fn status(&self) -> &Arc<BlockStatus> {
        self.input.status()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots<T>> {
        self.slots.lock().expect("broadcast slots lock poisoned")
    }

    fn copy(&self, value: &T) -> Result<T, DataflowError> {
        guarded("clone function", || (self.clone_fn)(value))
    }

    /// Copies `value` into the slot of every link whose predicate accepts it,
    /// overwriting what was there, and makes it the latest value.
    fn fan_out(&self, value: T) -> Result<(), DataflowError> {
        let links = self.links.snapshot();
        let mut copies = Vec::with_capacity(links.len());
        for entry in &links {
            if entry.accepts(&value)? {
                copies.push((entry.id, self.copy(&value)?));
            }
        }

        let mut slots = self.lock();
        slots.pending.retain(|id, _| links.iter().any(|l| l.id == *id));
        for (id, copy) in copies {
            if slots.pending.insert(id, copy).is_some() {
                log::trace!(
                    "Broadcast '{}' overwrote an undelivered value for link {}",
                    self.status().name(),
                    id
                );
            }
        }
        slots.latest = Some(Arc::new(value));
        Ok(())
    }

    /// Gives links added since the last pass a copy of the latest value.
    /// Runs on the worker, the only writer of `latest`, so a seed is never
    /// older than what the next fan-out sees.
    fn seed_new_links(&self) -> Result<(), DataflowError> {
        let (ids, latest) = {
            let mut slots = self.lock();
            if slots.unseeded.is_empty() {
                return Ok(());
            }
            (std::mem::take(&mut slots.unseeded), slots.latest.clone())
        };
        let Some(latest) = latest else {
            return Ok(());
        };
        for entry in self.links.snapshot() {
            if ids.contains(&entry.id) && entry.accepts(&latest)? {
                let seed = self.copy(&latest)?;
                self.lock().pending.insert(entry.id, seed);
            }
        }
        Ok(())
    }

    fn fail(&self, error: DataflowError) {
        log::error!("Broadcast '{}' faulted: {}", self.status().name(), error);
        fault_block(&self.input, error, None::<fn()>);
    }

    /// Offers every pending slot to its target once. Returns `true` if any
    /// slot was handed off.
    fn deliver(&self) -> bool {
        let mut progressed = false;
        for entry in self.links.snapshot() {
            let Some(value) = self.lock().pending.remove(&entry.id) else {
                continue;
            };
            match entry.target.offer(value, &self.wake) {
                OfferStatus::Accepted => {
                    self.links.record_transfer(&entry);
                    progressed = true;
                }
                OfferStatus::Postponed(value) => {
                    self.lock().pending.insert(entry.id, value);
                }
                OfferStatus::Declined(_) => {
                    log::debug!(
                        "Broadcast '{}': target '{}' declined, dropping its slot",
                        self.status().name(),
                        entry.target.name()
                    );
                }
            }
        }
        progressed
    }

    fn slots_empty(&self) -> bool {
        let links = self.links.snapshot();
        let mut slots = self.lock();
        // Slots of links that were removed are never delivered.
        slots.pending.retain(|id, _| links.iter().any(|l| l.id == *id));
        slots.pending.is_empty() && slots.unseeded.is_empty()
    }

    async fn run(self: Arc<Self>) {
        loop {
            if let Some(error) = self.status().fault_error() {
                self.lock().pending.clear();
                self.links.propagate_fault(&error);
                self.updated.notify_waiters();
                return;
            }

            if let Err(error) = self.seed_new_links() {
                self.fail(error);
                continue;
            }
            let mut progressed = false;
            if let Some(message) = self.input.try_dequeue() {
                let fanned = self.fan_out(message.into_payload());
                self.input.release(1);
                if let Err(error) = fanned {
                    self.fail(error);
                    continue;
                }
                self.updated.notify_waiters();
                progressed = true;
            }
            progressed |= self.deliver();

            if !self.status().is_accepting() && self.input.is_empty() && self.slots_empty() {
                self.status().set_completed();
                self.links.propagate_completion();
                self.updated.notify_waiters();
                return;
            }
            if !progressed {
                self.wake.notified().await;
            }
        }
    }
}

/// # Broadcast Block
pub struct BroadcastBlock<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + Sync + 'static> BroadcastBlock<T> {
    /// Creates the block; values are copied with `Clone::clone`.
    pub fn new(options: BroadcastOptions) -> Result<Arc<Self>, DataflowError> {
        Self::with_cloning(options, T::clone)
    }
}

impl<T: Send + Sync + 'static> BroadcastBlock<T> {
    /// Creates the block with a custom clone function.
    pub fn with_cloning<F>(options: BroadcastOptions, clone_fn: F) -> Result<Arc<Self>, DataflowError>
    where
        F: Fn(&T) -> T + Send + Sync + 'static,
    {
        options.validate()?;
        let status = Arc::new(BlockStatus::new(block_name("broadcast", &options.name)));
        let wake = Arc::new(Notify::new());
        let shared = Arc::new(Shared {
            input: InputQueue::with_signal(Arc::clone(&status), options.bounded_capacity, Arc::clone(&wake)),
            links: LinkSet::new(status, Arc::clone(&wake)),
            slots: Mutex::new(Slots {
                latest: None,
                pending: HashMap::new(),
                unseeded: Vec::new(),
            }),
            clone_fn: Arc::new(clone_fn),
            wake,
            updated: Notify::new(),
        });
        tokio::spawn(Arc::clone(&shared).run());
        log::debug!("Created broadcast block '{}'", shared.status().name());
        Ok(Arc::new(Self { shared }))
    }

    /// Messages waiting to be broadcast.
    pub fn input_count(&self) -> usize {
        self.shared.input.len()
    }

    /// A copy of the latest value. A panicking clone function faults the
    /// block and yields nothing.
    fn latest(&self) -> Option<T> {
        let latest = self.shared.lock().latest.clone()?;
        match self.shared.copy(&latest) {
            Ok(copy) => Some(copy),
            Err(error) => {
                fault_block(&self.shared.input, error, None::<fn()>);
                None
            }
        }
    }
}

impl<T: Send + Sync + 'static> Block for BroadcastBlock<T> {
    fn name(&self) -> &str {
        self.shared.status().name()
    }

    fn complete(&self) {
        complete_block(&self.shared.input);
    }

    fn fault(&self, error: DataflowError) {
        // Closing the input fires `wake`, which the worker sleeps on.
        fault_block(&self.shared.input, error, None::<fn()>);
    }

    fn completion(&self) -> Completion {
        self.shared.status().completion()
    }
}

impl<T: Send + Sync + 'static> Target<T> for BroadcastBlock<T> {
    fn try_post(&self, value: T) -> Result<(), DataflowError> {
        self.shared.input.try_post(value).map_err(|(_, error)| error)
    }

    fn send(&self, value: T) -> BoxFuture<'_, bool> {
        Box::pin(self.shared.input.send(value, None))
    }

    fn send_with_cancellation(&self, value: T, cancel: CancellationToken) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.shared.input.send(value, Some(&cancel)).await })
    }

    fn offer(&self, value: T, waker: &Arc<Notify>) -> OfferStatus<T> {
        self.shared.input.offer(value, waker)
    }

    fn attach_upstream(&self) {
        self.shared.status().attach_upstream();
    }

    fn detach_upstream(&self) {
        if self.shared.status().detach_upstream() {
            self.complete();
        }
    }

    fn upstream_completed(&self) {
        if self.shared.status().upstream_completed() {
            self.complete();
        }
    }
}

impl<T: Send + Sync + 'static> Source<T> for BroadcastBlock<T> {
    /// New links are seeded with the latest value by the block's worker,
    /// unless the block already finished.
    fn link_to(&self, target: Arc<dyn Target<T>>, options: LinkOptions<T>) -> Result<LinkHandle, DataflowError> {
        let shared = &self.shared;
        let (id, handle) = shared.links.add(target, options)?;
        if !shared.status().is_terminal() {
            shared.lock().unseeded.push(id);
        }
        shared.wake.notify_one();
        Ok(handle)
    }

    /// A copy of the latest value; nothing is consumed.
    fn try_receive(&self) -> Option<T> {
        self.latest()
    }

    /// Waits until a latest value exists and returns a copy of it. Resolves
    /// `None` if the block ends without ever having taken a value.
    fn receive(&self) -> BoxFuture<'_, Option<T>> {
        Box::pin(async move {
            loop {
                let updated = self.shared.updated.notified();
                tokio::pin!(updated);
                updated.as_mut().enable();

                if let Some(value) = self.latest() {
                    return Some(value);
                }
                if self.shared.status().is_terminal() {
                    return None;
                }
                updated.await;
            }
        })
    }

    /// Slots still waiting for their target.
    fn output_count(&self) -> usize {
        self.shared.lock().pending.len()
    }
}
