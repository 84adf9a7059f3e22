//! # Blocks
//!
//! The concrete block kinds. Each one is a thin shell that wires the core
//! pieces (input queue, worker, output port, links) together and implements
//! the capability traits that fit it:
//!
//! | block                | `Target` | `Source` | output per input        |
//! |----------------------|----------|----------|-------------------------|
//! | `BufferBlock`        | yes      | yes      | the input itself        |
//! | `ActionBlock`        | yes      | no       | nothing (sink)          |
//! | `TransformBlock`     | yes      | yes      | exactly one             |
//! | `TransformManyBlock` | yes      | yes      | zero or more            |
//! | `BatchBlock`         | yes      | yes      | one `Vec` per batch     |
//! | `JoinBlock`          | targets  | yes      | one tuple per pairing   |
//! | `BroadcastBlock`     | yes      | yes      | a copy per link, latest |
//!
//! Constructors return `Arc<Self>` because links hold their targets as
//! `Arc<dyn Target<T>>`.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Sink block running a user function per message.
pub mod action;
/// Groups messages into fixed-size batches with a manual flush.
pub mod batch;
/// Fan-out block keeping the latest value for every link.
pub mod broadcast;
/// Identity block: a bounded queue with links.
pub mod buffer;
/// Fan-in blocks pairing one item from each input.
pub mod join;
/// One-to-one transformation.
pub mod transform;
/// One-to-many transformation.
pub mod transform_many;
