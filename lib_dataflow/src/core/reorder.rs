//! # Reorder Buffer
//!
//! Parallel workers finish in any order. When a block must preserve input
//! order, each finished result is parked here under its input sequence number
//! and released only once every lower sequence number has been released.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::BTreeMap;

/// Min-sequence reorder buffer. Sequence numbers must be dense and start at
/// zero, which is how [`crate::core::input::InputQueue`] assigns them.
#[derive(Debug)]
pub(crate) struct ReorderBuffer<T> {
    next: u64,
    parked: BTreeMap<u64, T>,
}

impl<T> ReorderBuffer<T> {
    pub(crate) fn new() -> Self {
        Self {
            next: 0,
            parked: BTreeMap::new(),
        }
    }

    /// Parks `value` and returns every value that became releasable, in order.
    pub(crate) fn insert(&mut self, seq: u64, value: T) -> Vec<T> {
        self.parked.insert(seq, value);
        let mut ready = Vec::new();
        while let Some(value) = self.parked.remove(&self.next) {
            ready.push(value);
            self.next += 1;
        }
        ready
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.parked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_only_contiguous_prefix() {
        let mut buf = ReorderBuffer::new();
        assert!(buf.insert(2, "c").is_empty());
        assert!(buf.insert(1, "b").is_empty());
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.insert(0, "a"), vec!["a", "b", "c"]);
        assert_eq!(buf.insert(3, "d"), vec!["d"]);
        assert_eq!(buf.len(), 0);
    }
}
