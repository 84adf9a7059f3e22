//! # Links
//!
//! A link is a directed edge from a source block to a target block. Each
//! source keeps its outgoing links in a [`LinkSet`]: an ordered list that is
//! only ever appended to or removed from, so the offer order is always the
//! registration order.
//!
//! A link carries three options:
//!
//! - **`propagate_completion`**: the target completes once every propagating
//!   source completed; a source fault is forwarded immediately.
//! - **`predicate`**: messages it rejects are offered to the next link.
//! - **`max_messages`**: the link removes itself after that many transfers.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;

use crate::block::{OfferStatus, Target};
use crate::core::guarded;
use crate::core::status::{BlockState, BlockStatus};
use crate::error::DataflowError;

/// Message filter attached to a link.
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// # Link Options
pub struct LinkOptions<T> {
    /// Forward completion and faults to the target.
    pub propagate_completion: bool,
    /// Only messages matching the predicate take this link.
    pub predicate: Option<Predicate<T>>,
    /// Unlink automatically after this many messages. `None` is unbounded.
    pub max_messages: Option<usize>,
}

impl<T> Default for LinkOptions<T> {
    fn default() -> Self {
        Self {
            propagate_completion: false,
            predicate: None,
            max_messages: None,
        }
    }
}

impl<T> Clone for LinkOptions<T> {
    fn clone(&self) -> Self {
        Self {
            propagate_completion: self.propagate_completion,
            predicate: self.predicate.clone(),
            max_messages: self.max_messages,
        }
    }
}

impl<T> fmt::Debug for LinkOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkOptions")
            .field("propagate_completion", &self.propagate_completion)
            .field("predicate", &self.predicate.is_some())
            .field("max_messages", &self.max_messages)
            .finish()
    }
}

impl<T> LinkOptions<T> {
    /// Plain link: no propagation, no filter, unbounded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Link that propagates completion and faults.
    pub fn propagate() -> Self {
        Self {
            propagate_completion: true,
            ..Self::default()
        }
    }

    /// Adds a filter.
    pub fn with_predicate(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Limits the number of transferred messages.
    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = Some(max_messages);
        self
    }
}

/// Removal hook a [`LinkHandle`] calls back into.
pub(crate) trait Unlink: Send + Sync {
    fn unlink(&self, id: u64) -> bool;
}

/// # Link Handle
///
/// Returned by `link_to`. Dropping it leaves the link in place; call
/// [`LinkHandle::unlink`] to remove it.
pub struct LinkHandle {
    id: u64,
    source: Weak<dyn Unlink>,
}

impl LinkHandle {
    /// Identifier of the link within its source.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the link. Returns `false` when it was already gone (unlinked,
    /// exhausted by `max_messages`, or its source was dropped).
    pub fn unlink(self) -> bool {
        match self.source.upgrade() {
            Some(source) => source.unlink(self.id),
            None => false,
        }
    }
}

impl fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkHandle").field("id", &self.id).finish()
    }
}

pub(crate) struct LinkEntry<T> {
    pub(crate) id: u64,
    pub(crate) target: Arc<dyn Target<T>>,
    predicate: Option<Predicate<T>>,
    propagate: bool,
    remaining: Option<AtomicUsize>,
    /// Set once completion or a fault was forwarded through this link.
    settled: AtomicBool,
}

impl<T> LinkEntry<T> {
    /// Runs the predicate. A panicking predicate is reported as a fault of
    /// the source block.
    pub(crate) fn accepts(&self, value: &T) -> Result<bool, DataflowError> {
        match &self.predicate {
            Some(predicate) => guarded("link predicate", || predicate(value)),
            None => Ok(true),
        }
    }

    /// Counts one transfer. Returns `true` when the link is now exhausted.
    fn consume(&self) -> bool {
        match &self.remaining {
            Some(remaining) => remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .map_or(true, |previous| previous <= 1),
            None => false,
        }
    }

    fn settle(&self) -> bool {
        self.propagate && !self.settled.swap(true, Ordering::AcqRel)
    }
}

/// Outcome of offering one value along a [`LinkSet`].
pub(crate) enum Delivery<T> {
    /// A target accepted the value.
    Taken,
    /// Nobody took it; the value comes back.
    Kept(T),
    /// A predicate panicked while routing the value.
    Failed(DataflowError),
}

/// Ordered outgoing links of one source block.
pub(crate) struct LinkSet<T> {
    status: Arc<BlockStatus>,
    links: Mutex<Vec<Arc<LinkEntry<T>>>>,
    next_id: AtomicU64,
    /// The owning block's delivery signal, fired when links change.
    wake: Arc<Notify>,
}

impl<T: Send + 'static> LinkSet<T> {
    pub(crate) fn new(status: Arc<BlockStatus>, wake: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            status,
            links: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            wake,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<LinkEntry<T>>>> {
        self.links.lock().expect("link set lock poisoned")
    }

    pub(crate) fn add(
        self: &Arc<Self>,
        target: Arc<dyn Target<T>>,
        options: LinkOptions<T>,
    ) -> Result<(u64, LinkHandle), DataflowError> {
        if target.completion().is_terminal() {
            return Err(DataflowError::LinkAlreadyFaulted {
                target: target.name().to_string(),
            });
        }
        if options.max_messages == Some(0) {
            return Err(DataflowError::InvalidOptions(
                "max_messages must be at least 1".into(),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(LinkEntry {
            id,
            target,
            predicate: options.predicate,
            propagate: options.propagate_completion,
            remaining: options.max_messages.map(AtomicUsize::new),
            settled: AtomicBool::new(false),
        });
        if entry.propagate {
            entry.target.attach_upstream();
        }
        self.lock().push(Arc::clone(&entry));
        log::debug!(
            "Linked '{}' -> '{}' (link {}, propagate: {})",
            self.status.name(),
            entry.target.name(),
            id,
            entry.propagate
        );

        // A source that is already terminal forwards its outcome right away.
        match self.status.state() {
            BlockState::Completed => self.settle_completed(&entry),
            BlockState::Faulted(error) => self.settle_faulted(&entry, &error),
            _ => self.wake.notify_one(),
        }

        let unlink: Arc<dyn Unlink> = Arc::clone(self) as Arc<dyn Unlink>;
        let handle = LinkHandle {
            id,
            source: Arc::downgrade(&unlink),
        };
        Ok((id, handle))
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<LinkEntry<T>>> {
        self.lock().clone()
    }

    fn remove(&self, id: u64) -> Option<Arc<LinkEntry<T>>> {
        let mut links = self.lock();
        let index = links.iter().position(|l| l.id == id)?;
        Some(links.remove(index))
    }

    fn detach(&self, entry: &LinkEntry<T>) {
        if entry.settle() {
            entry.target.detach_upstream();
        }
        self.wake.notify_one();
    }

    /// Records one accepted transfer on `entry`, dropping the link when its
    /// `max_messages` budget is spent.
    pub(crate) fn record_transfer(&self, entry: &LinkEntry<T>) {
        if entry.consume() && self.remove(entry.id).is_some() {
            log::debug!(
                "Link {} from '{}' reached its message limit",
                entry.id,
                self.status.name()
            );
            self.detach(entry);
        }
    }

    /// Offers `value` to the links in registration order; the first one that
    /// accepts wins. Gives the value back when nobody took it.
    pub(crate) fn offer_in_order(&self, mut value: T) -> Delivery<T> {
        for entry in self.snapshot() {
            match entry.accepts(&value) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(error) => return Delivery::Failed(error),
            }
            match entry.target.offer(value, &self.wake) {
                OfferStatus::Accepted => {
                    self.record_transfer(&entry);
                    return Delivery::Taken;
                }
                OfferStatus::Postponed(v) | OfferStatus::Declined(v) => value = v,
            }
        }
        Delivery::Kept(value)
    }

    fn settle_completed(&self, entry: &LinkEntry<T>) {
        if entry.settle() {
            entry.target.upstream_completed();
        }
    }

    fn settle_faulted(&self, entry: &LinkEntry<T>, error: &DataflowError) {
        if entry.settle() {
            entry.target.fault(error.clone());
        }
    }

    /// Forwards completion along every propagating link.
    pub(crate) fn propagate_completion(&self) {
        for entry in self.snapshot() {
            self.settle_completed(&entry);
        }
    }

    /// Forwards a fault along every propagating link. Faults never travel
    /// upstream, only through this call.
    pub(crate) fn propagate_fault(&self, error: &DataflowError) {
        for entry in self.snapshot() {
            self.settle_faulted(&entry, error);
        }
    }
}

impl<T: Send + 'static> Unlink for LinkSet<T> {
    fn unlink(&self, id: u64) -> bool {
        match self.remove(id) {
            Some(entry) => {
                log::debug!("Unlinked link {} from '{}'", id, self.status.name());
                self.detach(&entry);
                true
            }
            None => false,
        }
    }
}
