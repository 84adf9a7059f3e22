//! # Output Port
//!
//! The output side of a single-consumer source block (buffer, transform,
//! transform-many, batch, join). Produced values wait here until one linked
//! target takes them or a caller receives them.
//!
//! ## Delivery Loop
//!
//! One task per block drains the port in FIFO order:
//!
//! 1.  Pop the head and offer it to the links in registration order.
//! 2.  If nobody accepts, push it back and sleep on the port's wake signal.
//!     Full targets keep that signal and fire it when they free capacity;
//!     adding a link, receiving, producing, and faulting fire it too. The
//!     loop therefore never spins on a full target.
//! 3.  Once the producer side is finished and the port is empty, the block
//!     becomes `Completed` and completion is forwarded along propagating
//!     links. On a fault the pending values are dropped and the fault is
//!     forwarded instead. A panicking link predicate faults the block.
//!
//! Receivers sleep on a separate signal. It fires on every push, and also
//! when the loop puts an undeliverable head back: a `receive` that looked
//! while the head was popped would otherwise sleep next to a non-empty queue.
//!
//! Each pending value carries the number of input capacity units it still
//! holds; they are returned to the block's input once the value leaves.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::block::Target;
use crate::core::status::BlockStatus;
use crate::error::DataflowError;
use crate::link::{Delivery, LinkHandle, LinkOptions, LinkSet};

/// Hands capacity units back to the producing block's input.
pub(crate) type ReleaseFn = Box<dyn Fn(usize) + Send + Sync>;

/// Faults the block owning the port, input side included.
pub(crate) type FaultFn = Box<dyn Fn(DataflowError) + Send + Sync>;

struct Pending<O> {
    value: O,
    release: usize,
}

struct PortState<O> {
    queue: VecDeque<Pending<O>>,
    producer_done: bool,
}

enum Step<O> {
    Deliver(Pending<O>),
    Wait,
    Finish,
    Abandon(DataflowError),
}

pub(crate) struct OutputPort<O> {
    status: Arc<BlockStatus>,
    links: Arc<LinkSet<O>>,
    state: Mutex<PortState<O>>,
    /// Fired for anything the delivery loop should react to.
    wake: Arc<Notify>,
    /// Fired for receivers whenever a value arrives or the port finishes.
    pushed: Notify,
    release: ReleaseFn,
    fault: FaultFn,
}

impl<O: Send + 'static> OutputPort<O> {
    /// Creates the port and spawns its delivery loop on the current runtime.
    pub(crate) fn start(status: Arc<BlockStatus>, release: ReleaseFn, fault: FaultFn) -> Arc<Self> {
        let wake = Arc::new(Notify::new());
        let port = Arc::new(Self {
            links: LinkSet::new(Arc::clone(&status), Arc::clone(&wake)),
            status,
            state: Mutex::new(PortState {
                queue: VecDeque::new(),
                producer_done: false,
            }),
            wake,
            pushed: Notify::new(),
            release,
            fault,
        });
        tokio::spawn(Arc::clone(&port).deliver_loop());
        port
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PortState<O>> {
        self.state.lock().expect("output port lock poisoned")
    }

    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }

    /// Queues a single value holding `release` capacity units.
    pub(crate) fn push(&self, value: O, release: usize) {
        {
            let mut state = self.lock();
            // Checked under the lock: the delivery loop clears the queue after
            // the fault is set, so nothing pushed here can outlive it.
            if self.status.is_faulted() {
                return;
            }
            state.queue.push_back(Pending { value, release });
        }
        self.wake.notify_one();
        self.pushed.notify_waiters();
    }

    /// Queues several values produced from inputs holding `release` units in
    /// total. The units travel with the last value; an empty group hands
    /// them back immediately.
    pub(crate) fn push_group(&self, values: Vec<O>, release: usize) {
        let count = values.len();
        if count == 0 {
            (self.release)(release);
            return;
        }
        {
            let mut state = self.lock();
            if self.status.is_faulted() {
                return;
            }
            for (index, value) in values.into_iter().enumerate() {
                let units = if index + 1 == count { release } else { 0 };
                state.queue.push_back(Pending {
                    value,
                    release: units,
                });
            }
        }
        self.wake.notify_one();
        self.pushed.notify_waiters();
    }

    /// The producer will not push anything else.
    pub(crate) fn finish(&self) {
        self.lock().producer_done = true;
        self.wake.notify_one();
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub(crate) fn link(
        &self,
        target: Arc<dyn Target<O>>,
        options: LinkOptions<O>,
    ) -> Result<LinkHandle, DataflowError> {
        self.links.add(target, options).map(|(_, handle)| handle)
    }

    pub(crate) fn try_receive(&self) -> Option<O> {
        if self.status.is_faulted() {
            return None;
        }
        let pending = self.lock().queue.pop_front()?;
        (self.release)(pending.release);
        // The loop may be waiting for exactly this slot to finish the block.
        self.wake.notify_one();
        Some(pending.value)
    }

    pub(crate) async fn receive(&self) -> Option<O> {
        loop {
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_receive() {
                return Some(value);
            }
            if self.status.is_terminal() {
                return None;
            }
            notified.await;
        }
    }

    fn next_step(&self) -> Step<O> {
        if let Some(error) = self.status.fault_error() {
            return Step::Abandon(error);
        }
        let mut state = self.lock();
        match state.queue.pop_front() {
            Some(pending) => Step::Deliver(pending),
            None if state.producer_done => Step::Finish,
            None => Step::Wait,
        }
    }

    async fn deliver_loop(self: Arc<Self>) {
        loop {
            match self.next_step() {
                Step::Deliver(pending) => match self.links.offer_in_order(pending.value) {
                    Delivery::Taken => (self.release)(pending.release),
                    Delivery::Kept(value) => {
                        self.lock().queue.push_front(Pending {
                            value,
                            release: pending.release,
                        });
                        self.pushed.notify_waiters();
                        self.wake.notified().await;
                    }
                    Delivery::Failed(error) => {
                        log::error!("Block '{}' faulted while routing: {}", self.status.name(), error);
                        (self.release)(pending.release);
                        (self.fault)(error);
                    }
                },
                Step::Wait => self.wake.notified().await,
                Step::Finish => {
                    self.status.set_completed();
                    self.links.propagate_completion();
                    self.pushed.notify_waiters();
                    return;
                }
                Step::Abandon(error) => {
                    let dropped = {
                        let mut state = self.lock();
                        let dropped = state.queue.len();
                        state.queue.clear();
                        dropped
                    };
                    if dropped > 0 {
                        log::debug!(
                            "Block '{}' dropped {} undelivered output(s) on fault",
                            self.status.name(),
                            dropped
                        );
                    }
                    self.links.propagate_fault(&error);
                    self.pushed.notify_waiters();
                    return;
                }
            }
        }
    }
}
