//! # Bounded Input Queue
//!
//! The input side of every block. It owns the FIFO of [`Message`]s and the
//! capacity accounting, and implements the three ways a value can enter a
//! block:
//!
//! - **`post`**: never waits. Fails when the block is full or not accepting.
//! - **`send`**: waits for room. Waiters are queued on a `tokio::sync::Semaphore`,
//!   whose wait list is FIFO, so suspended senders are served in arrival order.
//!   Completing or faulting the block closes the semaphore, which wakes every
//!   waiter with a refusal.
//! - **`offer`**: the block-to-block protocol. Like `post`, but when the queue
//!   is full the offering source leaves its wake handle behind and gets the
//!   value back as `Postponed`. The handle is fired the next time capacity is
//!   released, so a source never polls a full target.
//!
//! Capacity is held by a message until its owner block calls
//! [`InputQueue::release`], which usually happens when the resulting output
//! has left the block, not merely when the message is dequeued.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

use crate::block::OfferStatus;
use crate::core::status::BlockStatus;
use crate::error::DataflowError;
use crate::message::Message;

struct QueueState<T> {
    items: VecDeque<Message<T>>,
    next_seq: u64,
    postponed: Vec<Arc<Notify>>,
}

pub(crate) struct InputQueue<T> {
    status: Arc<BlockStatus>,
    inner: Mutex<QueueState<T>>,
    permits: Option<Arc<Semaphore>>,
    /// Signals the block's worker that an item arrived or the state changed.
    available: Arc<Notify>,
}

impl<T> InputQueue<T> {
    pub(crate) fn new(status: Arc<BlockStatus>, capacity: Option<usize>) -> Self {
        Self::with_signal(status, capacity, Arc::new(Notify::new()))
    }

    /// Builds a queue that reports arrivals on a signal shared with other
    /// queues, so one worker can watch several inputs (join targets).
    pub(crate) fn with_signal(
        status: Arc<BlockStatus>,
        capacity: Option<usize>,
        available: Arc<Notify>,
    ) -> Self {
        Self {
            status,
            inner: Mutex::new(QueueState {
                items: VecDeque::new(),
                next_seq: 0,
                postponed: Vec::new(),
            }),
            permits: capacity.map(|c| Arc::new(Semaphore::new(c))),
            available,
        }
    }

    pub(crate) fn status(&self) -> &Arc<BlockStatus> {
        &self.status
    }

    pub(crate) fn available(&self) -> &Arc<Notify> {
        &self.available
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState<T>> {
        self.inner.lock().expect("input queue lock poisoned")
    }

    /// Appends under an already held lock. The capacity permit must have been
    /// taken by the caller.
    fn push_locked(&self, state: &mut QueueState<T>, value: T) {
        let seq = state.next_seq;
        state.next_seq += 1;
        state.items.push_back(Message::new(seq, value));
        self.available.notify_one();
    }

    /// Hands a permit back when the value could not be enqueued after all.
    fn give_back_permit(&self) {
        if let Some(permits) = &self.permits {
            permits.add_permits(1);
        }
    }

    pub(crate) fn try_post(&self, value: T) -> Result<(), (T, DataflowError)> {
        let mut state = self.lock();
        if !self.status.is_accepting() {
            let err = DataflowError::Declined {
                block: self.status.name().to_string(),
            };
            return Err((value, err));
        }
        if let Some(permits) = &self.permits {
            match permits.try_acquire() {
                Ok(permit) => permit.forget(),
                Err(_) => {
                    let err = DataflowError::CapacityExceeded {
                        block: self.status.name().to_string(),
                    };
                    return Err((value, err));
                }
            }
        }
        self.push_locked(&mut state, value);
        Ok(())
    }

    pub(crate) fn offer(&self, value: T, waker: &Arc<Notify>) -> OfferStatus<T> {
        let mut state = self.lock();
        if !self.status.is_accepting() {
            return OfferStatus::Declined(value);
        }
        if let Some(permits) = &self.permits {
            match permits.try_acquire() {
                Ok(permit) => permit.forget(),
                Err(TryAcquireError::Closed) => return OfferStatus::Declined(value),
                Err(TryAcquireError::NoPermits) => {
                    // Registered under the queue lock; `release` drains the
                    // list under the same lock, so the wake-up cannot be lost.
                    if !state.postponed.iter().any(|w| Arc::ptr_eq(w, waker)) {
                        state.postponed.push(Arc::clone(waker));
                    }
                    return OfferStatus::Postponed(value);
                }
            }
        }
        self.push_locked(&mut state, value);
        OfferStatus::Accepted
    }

    pub(crate) async fn send(&self, value: T, cancel: Option<&CancellationToken>) -> bool {
        let Some(permits) = &self.permits else {
            return self.try_post(value).is_ok();
        };
        let acquire = Arc::clone(permits).acquire_owned();
        let permit = match cancel {
            Some(token) => tokio::select! {
                permit = acquire => permit,
                _ = token.cancelled() => {
                    log::debug!("Send to '{}' cancelled while waiting for capacity", self.status.name());
                    return false;
                }
            },
            None => acquire.await,
        };
        let Ok(permit) = permit else {
            // Semaphore closed: the block stopped accepting while we waited.
            return false;
        };
        permit.forget();

        let mut state = self.lock();
        if !self.status.is_accepting() {
            drop(state);
            self.give_back_permit();
            return false;
        }
        self.push_locked(&mut state, value);
        true
    }

    pub(crate) fn try_dequeue(&self) -> Option<Message<T>> {
        self.lock().items.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Returns `count` capacity units and wakes every postponed source.
    pub(crate) fn release(&self, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(permits) = &self.permits {
            permits.add_permits(count);
        }
        self.wake_postponed();
    }

    fn wake_postponed(&self) {
        let waiters = std::mem::take(&mut self.lock().postponed);
        for waker in waiters {
            waker.notify_one();
        }
    }

    /// Stops accepting input. Waiting senders are refused, postponed sources
    /// are woken so they can try their other links, the worker is woken to
    /// notice the drain condition.
    pub(crate) fn close(&self) {
        if let Some(permits) = &self.permits {
            permits.close();
        }
        self.wake_postponed();
        self.available.notify_one();
    }

    /// Drops every queued message. Returns how many were discarded.
    pub(crate) fn clear(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.items.len();
        state.items.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn queue(capacity: Option<usize>) -> InputQueue<u32> {
        InputQueue::new(Arc::new(BlockStatus::new("q".into())), capacity)
    }

    #[tokio::test]
    async fn post_respects_capacity_and_assigns_sequence_numbers() {
        let q = queue(Some(2));
        assert!(q.try_post(1).is_ok());
        assert!(q.try_post(2).is_ok());
        assert!(matches!(
            q.try_post(3),
            Err((3, DataflowError::CapacityExceeded { .. }))
        ));
        assert_eq!(q.try_dequeue().map(|m| m.into_parts()), Some((0, 1)));
        assert_eq!(q.try_dequeue().map(|m| m.into_parts()), Some((1, 2)));
        // Dequeue alone does not free the slot; release does.
        assert!(q.try_post(4).is_err());
        q.release(1);
        assert!(q.try_post(4).is_ok());
    }

    #[tokio::test]
    async fn offer_postpones_and_wakes_the_source_on_release() {
        let q = queue(Some(1));
        let waker = Arc::new(Notify::new());
        assert!(q.offer(1, &waker).is_accepted());
        assert!(matches!(q.offer(2, &waker), OfferStatus::Postponed(2)));
        q.try_dequeue();
        q.release(1);
        tokio::time::timeout(Duration::from_secs(1), waker.notified())
            .await
            .expect("postponed source was not woken");
        assert!(q.offer(2, &waker).is_accepted());
    }

    #[tokio::test]
    async fn closed_queue_declines_and_refuses_waiting_senders() {
        let q = Arc::new(queue(Some(1)));
        assert!(q.try_post(1).is_ok());
        let sender = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.send(2, None).await })
        };
        tokio::task::yield_now().await;
        q.status().begin_completing();
        q.close();
        assert!(!sender.await.unwrap());
        let waker = Arc::new(Notify::new());
        assert!(matches!(q.offer(3, &waker), OfferStatus::Declined(3)));
    }

    #[tokio::test]
    async fn cancelled_send_returns_false_without_faulting() {
        let q = queue(Some(1));
        assert!(q.try_post(1).is_ok());
        let token = CancellationToken::new();
        token.cancel();
        assert!(!q.send(2, Some(&token)).await);
        assert!(q.status().is_accepting());
        assert_eq!(q.len(), 1);
    }
}
