//! Keyframe index for GOP-aware positioning
//!
//! Every video keyframe written to the ring is remembered here by its slot
//! index. This is what lets the dispatcher:
//! 1. start a late joiner on the most recent keyframe
//! 2. jump a key-mode or redirected receiver to the next decodable frame
//! 3. evict whole old GOPs instead of cutting one in half
//!
//! Indices are strictly increasing; entries older than the ring head are
//! pruned whenever the head moves.

use std::collections::VecDeque;

/// Ordered list of keyframe slot indices
#[derive(Debug, Default)]
pub struct KeyIndex {
    keys: VecDeque<u64>,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a keyframe at `index`
    ///
    /// Indices must be pushed in increasing order; out-of-order pushes are
    /// ignored.
    pub fn push(&mut self, index: u64) {
        if self.keys.back().is_some_and(|last| *last >= index) {
            return;
        }
        self.keys.push_back(index);
    }

    /// Drop keyframes that are no longer in the ring
    pub fn prune_before(&mut self, head: u64) {
        while self.keys.front().is_some_and(|k| *k < head) {
            self.keys.pop_front();
        }
    }

    /// Most recent keyframe
    pub fn latest(&self) -> Option<u64> {
        self.keys.back().copied()
    }

    /// First keyframe at or after `cursor`
    pub fn first_at_or_after(&self, cursor: u64) -> Option<u64> {
        self.keys.iter().copied().find(|k| *k >= cursor)
    }

    /// Latest keyframe, if it is at or after `cursor`
    pub fn latest_at_or_after(&self, cursor: u64) -> Option<u64> {
        self.latest().filter(|k| *k >= cursor)
    }

    /// End of the oldest complete GOP that starts at `head`
    ///
    /// This is the first keyframe strictly after `head`: everything before
    /// it can be dropped without leaving a GOP without its keyframe.
    pub fn gop_boundary_after(&self, head: u64) -> Option<u64> {
        self.keys.iter().copied().find(|k| *k > head)
    }

    pub fn contains(&self, index: u64) -> bool {
        self.keys.binary_search(&index).is_ok()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
