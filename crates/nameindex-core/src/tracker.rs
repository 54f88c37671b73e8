//! Block tracker: a sliding window of recent main-chain headers, used to
//! notice when the node's chain no longer matches what was last seen.

use std::collections::VecDeque;

use crate::types::BlockHeader;

/// Tracks the last N `(height, hash)` pairs observed on the node.
pub struct BlockTracker {
    /// Sliding window of recent blocks (oldest first).
    window: VecDeque<BlockHeader>,
    /// Maximum number of blocks to retain.
    window_size: usize,
}

impl BlockTracker {
    /// Create a new tracker with the given window size.
    pub fn new(window_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
        }
    }

    /// Append a header on top of the current head.
    ///
    /// Returns `Err(expected_height)` if the header does not directly follow
    /// the head.
    pub fn push(&mut self, header: BlockHeader) -> Result<(), u64> {
        if let Some(head) = self.window.back() {
            if header.height != head.height + 1 {
                return Err(head.height + 1);
            }
        }
        if self.window.len() >= self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(header);
        Ok(())
    }

    /// Returns the most recently added header.
    pub fn head(&self) -> Option<&BlockHeader> {
        self.window.back()
    }

    /// Returns a header by height if it's in the window.
    pub fn get(&self, height: u64) -> Option<&BlockHeader> {
        self.window.iter().find(|b| b.height == height)
    }

    /// Headers from newest to oldest.
    pub fn newest_first(&self) -> impl Iterator<Item = &BlockHeader> {
        self.window.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Maximum number of headers retained.
    pub fn capacity(&self) -> usize {
        self.window_size
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Discard every header above `height`.
    pub fn rewind_to(&mut self, height: u64) {
        while let Some(back) = self.window.back() {
            if back.height > height {
                self.window.pop_back();
            } else {
                break;
            }
        }
    }
}
