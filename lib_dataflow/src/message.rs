//! # Message Envelope
//!
//! The unit that sits in a block's input queue: the caller's payload plus the
//! sequence number the block assigned when the payload entered it. Sequence
//! numbers start at zero for every block and increase by one per accepted
//! message; the reorder buffer uses them to restore input order after
//! parallel processing.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// # Message
///
/// Immutable once enqueued; only [`Message::into_payload`] gives the payload
/// back to the worker that dequeued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<T> {
    seq: u64,
    payload: T,
}

impl<T> Message<T> {
    pub(crate) fn new(seq: u64, payload: T) -> Self {
        Self { seq, payload }
    }

    /// Consumes the envelope.
    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Splits the envelope into its sequence number and payload.
    pub fn into_parts(self) -> (u64, T) {
        (self.seq, self.payload)
    }
}
