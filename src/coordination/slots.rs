//! Double-buffer slot selection
//!
//! One bit per double-buffered family, at the family's own key position:
//! clear means "read slot 0, write slot 1", set means the opposite. Read
//! and write slots therefore always differ.

use crate::flags::{Flag, BUFFERS_ALL_DBL, DBLBUFFER_WRITE};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DoubleBufferSlots {
    swapped: Flag,
}

impl DoubleBufferSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exchange read and write slots of every double-buffered family in `mask`.
    /// Single-buffered keys in the mask are ignored.
    pub fn swap(&mut self, mask: Flag) {
        self.swapped ^= mask & BUFFERS_ALL_DBL;
    }

    /// Current read slot of `key` (0 for single-buffered families)
    pub fn read_slot(&self, key: Flag) -> usize {
        (self.swapped & key & BUFFERS_ALL_DBL != 0) as usize
    }

    /// Current write slot of `key` (0 for single-buffered families)
    pub fn write_slot(&self, key: Flag) -> usize {
        if key & BUFFERS_ALL_DBL == 0 {
            0
        } else {
            1 - self.read_slot(key)
        }
    }

    /// Slot addressed by an operation on `key` with the given slot bits
    pub fn slot_for(&self, key: Flag, flags: Flag) -> usize {
        if flags & DBLBUFFER_WRITE != 0 {
            self.write_slot(key)
        } else {
            self.read_slot(key)
        }
    }

    pub fn is_double_buffered(key: Flag) -> bool {
        key & BUFFERS_ALL_DBL != 0
    }
}
