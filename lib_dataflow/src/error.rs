//! # Dataflow Errors
//!
//! Every failure the engine can report is a variant of [`DataflowError`]. The
//! enum is `Clone` because a single fault is observed by many parties: every
//! clone of a block's completion handle and every downstream block reached
//! through a completion-propagating link receives the same error value.
//!
//! User behavior functions (transforms, sinks) return `anyhow::Result`; an
//! `Err` coming out of them is wrapped into [`DataflowError::Faulted`].

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
/// # Dataflow Error
///
/// The error taxonomy shared by all blocks.
pub enum DataflowError {
    /// A non-blocking post was declined because the block is at capacity.
    /// Never fatal; `post` reports it as `false`, `try_post` as this variant.
    #[error("block '{block}' is at capacity")]
    CapacityExceeded {
        /// Name of the block that declined the message.
        block: String,
    },

    /// The block stopped accepting input (completing, completed or faulted).
    #[error("block '{block}' no longer accepts messages")]
    Declined {
        /// Name of the block that declined the message.
        block: String,
    },

    /// A behavior function failed, or a fault was injected or propagated.
    #[error("block faulted: {0}")]
    Faulted(Arc<anyhow::Error>),

    /// A join block completed while some of its targets still held items
    /// that could never be paired, and its policy asks to report that.
    #[error("join block '{block}' completed with {leftover} unpaired item(s)")]
    UnpairedOnCompletion {
        /// Name of the join block.
        block: String,
        /// Total number of discarded items across all targets.
        leftover: usize,
    },

    /// A link was requested into a block that already reached a terminal state.
    #[error("cannot link into block '{target}': it is already completed or faulted")]
    LinkAlreadyFaulted {
        /// Name of the rejected target block.
        target: String,
    },

    /// Construction-time option validation failed.
    #[error("invalid block options: {0}")]
    InvalidOptions(String),

    /// Options could not be parsed from their JSON representation.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DataflowError {
    /// Wraps any error into a [`DataflowError::Faulted`].
    pub fn faulted(error: impl Into<anyhow::Error>) -> Self {
        Self::Faulted(Arc::new(error.into()))
    }
}

impl From<anyhow::Error> for DataflowError {
    fn from(error: anyhow::Error) -> Self {
        Self::Faulted(Arc::new(error))
    }
}

impl From<serde_json::Error> for DataflowError {
    fn from(error: serde_json::Error) -> Self {
        Self::Config(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faulted_keeps_the_original_message() {
        let err = DataflowError::faulted(anyhow::anyhow!("disk on fire"));
        assert!(err.to_string().contains("disk on fire"));
    }

    #[test]
    fn capacity_message_names_the_block() {
        let err = DataflowError::CapacityExceeded { block: "buf".into() };
        assert_eq!(err.to_string(), "block 'buf' is at capacity");
    }
}
