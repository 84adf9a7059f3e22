//! # lib_dataflow
//!
//! In-process dataflow blocks for building concurrent pipelines on tokio.
//! Blocks buffer, transform, batch, join and broadcast typed messages; they are
//! linked into directed graphs through which messages, backpressure and
//! completion travel.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lib_dataflow::{ActionBlock, Block, ExecutionOptions, LinkOptions, Source, Target, TransformBlock};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let square = TransformBlock::from_fn(ExecutionOptions::default(), |x: u64| Ok(x * x))?;
//! let print = ActionBlock::from_fn(ExecutionOptions::default(), |x: u64| {
//!     println!("{x}");
//!     Ok(())
//! })?;
//! square.link_to(print.clone(), LinkOptions::propagate())?;
//!
//! for i in 0..10 {
//!     square.send(i).await;
//! }
//! square.complete();
//! print.completion().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Every block must be created inside a tokio runtime: construction spawns the
//! block's worker task.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

// Declare the modules to re-export
pub mod block;
pub mod blocks;
pub mod core;
pub mod error;
pub mod link;
pub mod message;
pub mod options;

/// Logger setup for binaries built on the engine.
#[cfg(feature = "loggers")]
pub mod loggers;

// Re-export everything callers need to build a graph
pub use block::{link, Block, OfferStatus, Source, Target};
pub use blocks::action::ActionBlock;
pub use blocks::batch::BatchBlock;
pub use blocks::broadcast::BroadcastBlock;
pub use blocks::buffer::BufferBlock;
pub use blocks::join::{JoinBlock, JoinManyBlock, JoinTarget};
pub use blocks::transform::TransformBlock;
pub use blocks::transform_many::TransformManyBlock;
pub use crate::core::status::{BlockState, Completion};
pub use error::DataflowError;
pub use link::{LinkHandle, LinkOptions, Predicate};
pub use message::Message;
pub use options::{BatchOptions, BroadcastOptions, ExecutionOptions, JoinOptions, UnpairedPolicy};
