//! The pending-block buffer.
//!
//! Ordered mapping from view identifier to the encoded block announced for
//! that view and a snapshot of the validator's phase at the moment the
//! announce arrived. Keyed by a `BTreeMap` rather than a hash map so the
//! catch-up drain can walk views in increasing order.

use std::collections::BTreeMap;

use crate::state::Phase;

/// A block buffered against a view, awaiting either finalization in its own
/// right or catch-up drain once an earlier view commits.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedBlock {
    /// Encoded block bytes exactly as carried by the `Announce` payload.
    pub encoded_block: Vec<u8>,
    /// The validator's phase at the moment this entry was recorded.
    pub phase_at_arrival: Phase,
}

/// Ordered `view_id -> BufferedBlock` map.
///
/// A re-announce for the same view overwrites the existing entry.
#[derive(Debug, Default)]
pub struct BlockBuffer {
    entries: BTreeMap<u64, BufferedBlock>,
}

impl BlockBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Admits or overwrites the entry for `view_id`.
    pub fn insert(&mut self, view_id: u64, encoded_block: Vec<u8>, phase_at_arrival: Phase) {
        self.entries.insert(
            view_id,
            BufferedBlock {
                encoded_block,
                phase_at_arrival,
            },
        );
    }

    /// Removes and returns the entry for `view_id`, if any.
    pub fn remove(&mut self, view_id: u64) -> Option<BufferedBlock> {
        self.entries.remove(&view_id)
    }

    /// Whether the buffer holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of buffered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Views currently buffered, in ascending order (test/diagnostic use).
    pub fn views(&self) -> Vec<u64> {
        self.entries.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reannounce_overwrites() {
        let mut buf = BlockBuffer::new();
        buf.insert(7, vec![1, 2, 3], Phase::Finished);
        buf.insert(7, vec![9, 9], Phase::PrepareDone);
        let entry = buf.remove(7).unwrap();
        assert_eq!(entry.encoded_block, vec![9, 9]);
        assert!(buf.is_empty());
    }

    #[test]
    fn views_are_ascending() {
        let mut buf = BlockBuffer::new();
        buf.insert(9, vec![], Phase::Finished);
        buf.insert(7, vec![], Phase::Finished);
        buf.insert(8, vec![], Phase::Finished);
        assert_eq!(buf.views(), vec![7, 8, 9]);
    }
}
