//! # Block Options
//!
//! Construction-time configuration for every block kind. All option structs
//! are plain serde types with defaults for every field, so a pipeline can be
//! described in a JSON config file and only override what it needs:
//!
//! ```rust
//! use lib_dataflow::ExecutionOptions;
//!
//! let opts = ExecutionOptions::from_json(r#"{ "maxDegreeOfParallelism": 4 }"#).unwrap();
//! assert_eq!(opts.max_degree_of_parallelism, 4);
//! assert!(opts.ensure_ordered);
//! ```
//!
//! Link options carry a predicate closure and are therefore not serializable;
//! they live in [`crate::link`].

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::DataflowError;

fn from_json<T: DeserializeOwned>(json: &str) -> Result<T, DataflowError> {
    Ok(serde_json::from_str(json)?)
}

fn check_capacity(capacity: Option<usize>) -> Result<(), DataflowError> {
    // A capacity of zero would make every post fail forever.
    if capacity == Some(0) {
        return Err(DataflowError::InvalidOptions(
            "bounded_capacity must be at least 1 (use null for unbounded)".into(),
        ));
    }
    Ok(())
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
/// # Execution Options
///
/// Options shared by the worker blocks (buffer, action, transform,
/// transform-many).
pub struct ExecutionOptions {
    /// Maximum number of messages the block holds at once, counting queued,
    /// in-flight and not-yet-delivered messages. `None` means unbounded.
    pub bounded_capacity: Option<usize>,
    /// Number of messages processed concurrently. Must be at least 1.
    pub max_degree_of_parallelism: usize,
    /// Release outputs in input order even when processed out of order.
    pub ensure_ordered: bool,
    /// Name used in log lines and error messages.
    pub name: Option<String>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            bounded_capacity: None,
            max_degree_of_parallelism: 1,
            ensure_ordered: true,
            name: None,
        }
    }
}

impl ExecutionOptions {
    /// Parses options from JSON (camelCase keys, every key optional).
    pub fn from_json(json: &str) -> Result<Self, DataflowError> {
        from_json(json)
    }

    /// Sets the bounded capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.bounded_capacity = Some(capacity);
        self
    }

    /// Sets the degree of parallelism.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.max_degree_of_parallelism = parallelism;
        self
    }

    /// Sets the ordering flag.
    pub fn with_ensure_ordered(mut self, ensure_ordered: bool) -> Self {
        self.ensure_ordered = ensure_ordered;
        self
    }

    /// Sets the block name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), DataflowError> {
        if self.max_degree_of_parallelism == 0 {
            return Err(DataflowError::InvalidOptions(
                "max_degree_of_parallelism must be at least 1".into(),
            ));
        }
        check_capacity(self.bounded_capacity)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
/// # Batch Options
pub struct BatchOptions {
    /// Number of items per emitted batch. Must be at least 1.
    pub batch_size: usize,
    /// Maximum number of items held (queued plus batched plus undelivered).
    /// When set it must be at least `batch_size`.
    pub bounded_capacity: Option<usize>,
    /// Name used in log lines and error messages.
    pub name: Option<String>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 1,
            bounded_capacity: None,
            name: None,
        }
    }
}

impl BatchOptions {
    /// Options for batches of `batch_size` items, unbounded.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Self::default()
        }
    }

    /// Parses options from JSON.
    pub fn from_json(json: &str) -> Result<Self, DataflowError> {
        from_json(json)
    }

    /// Sets the bounded capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.bounded_capacity = Some(capacity);
        self
    }

    /// Sets the block name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), DataflowError> {
        if self.batch_size == 0 {
            return Err(DataflowError::InvalidOptions(
                "batch_size must be at least 1".into(),
            ));
        }
        check_capacity(self.bounded_capacity)?;
        // Below batch_size a full batch could never form.
        if let Some(capacity) = self.bounded_capacity {
            if capacity < self.batch_size {
                return Err(DataflowError::InvalidOptions(format!(
                    "bounded_capacity ({}) must be at least batch_size ({})",
                    capacity, self.batch_size
                )));
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
/// # Unpaired Policy
///
/// What a join block does with items that can no longer be paired once all
/// of its targets completed.
pub enum UnpairedPolicy {
    /// Drop the leftovers and complete normally (logged at `warn`).
    #[default]
    Discard,
    /// Fault the join with [`DataflowError::UnpairedOnCompletion`].
    Fault,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
/// # Join Options
pub struct JoinOptions {
    /// Capacity of each individual join target.
    pub bounded_capacity: Option<usize>,
    /// Leftover handling on completion.
    pub unpaired: UnpairedPolicy,
    /// Name used in log lines and error messages.
    pub name: Option<String>,
}

impl JoinOptions {
    /// Parses options from JSON.
    pub fn from_json(json: &str) -> Result<Self, DataflowError> {
        from_json(json)
    }

    /// Sets the per-target capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.bounded_capacity = Some(capacity);
        self
    }

    /// Sets the unpaired policy.
    pub fn with_unpaired(mut self, policy: UnpairedPolicy) -> Self {
        self.unpaired = policy;
        self
    }

    /// Sets the block name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), DataflowError> {
        check_capacity(self.bounded_capacity)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
/// # Broadcast Options
pub struct BroadcastOptions {
    /// Capacity of the broadcast input queue.
    pub bounded_capacity: Option<usize>,
    /// Name used in log lines and error messages.
    pub name: Option<String>,
}

impl BroadcastOptions {
    /// Parses options from JSON.
    pub fn from_json(json: &str) -> Result<Self, DataflowError> {
        from_json(json)
    }

    /// Sets the bounded capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.bounded_capacity = Some(capacity);
        self
    }

    /// Sets the block name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), DataflowError> {
        check_capacity(self.bounded_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_defaults_are_sequential_and_ordered() {
        let opts = ExecutionOptions::default();
        assert_eq!(opts.max_degree_of_parallelism, 1);
        assert!(opts.ensure_ordered);
        assert_eq!(opts.bounded_capacity, None);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn execution_from_json_overrides_only_given_keys() {
        let opts =
            ExecutionOptions::from_json(r#"{"boundedCapacity": 8, "ensureOrdered": false}"#)
                .unwrap();
        assert_eq!(opts.bounded_capacity, Some(8));
        assert!(!opts.ensure_ordered);
        assert_eq!(opts.max_degree_of_parallelism, 1);
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let opts = ExecutionOptions::default().with_parallelism(0);
        assert!(matches!(
            opts.validate(),
            Err(DataflowError::InvalidOptions(_))
        ));
    }

    #[test]
    fn batch_capacity_below_batch_size_is_rejected() {
        assert!(BatchOptions::new(10).with_capacity(5).validate().is_err());
        assert!(BatchOptions::new(0).validate().is_err());
        assert!(BatchOptions::new(10).with_capacity(10).validate().is_ok());
    }

    #[test]
    fn join_policy_parses_from_json() {
        let opts = JoinOptions::from_json(r#"{"unpaired": "fault"}"#).unwrap();
        assert_eq!(opts.unpaired, UnpairedPolicy::Fault);
        assert!(JoinOptions::from_json("{not json").is_err());
    }
}
