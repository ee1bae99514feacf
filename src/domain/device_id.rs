//! Global device identifiers
//!
//! A device is addressed across the whole run by one byte: the node rank in
//! the high bits and the node-local device index in the low `DEVICE_BITS`.

use serde::{Deserialize, Serialize};

/// Bits reserved to the node-local device index
pub const DEVICE_BITS: u32 = 3;
pub const DEVICE_BITS_MASK: u8 = (1 << DEVICE_BITS) - 1;
pub const MAX_DEVICES_PER_NODE: usize = 1 << DEVICE_BITS;
pub const MAX_NODES_PER_CLUSTER: usize = 1 << (u8::BITS - DEVICE_BITS);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct GlobalDeviceId(u8);

impl GlobalDeviceId {
    /// Pack a node rank and a node-local device index
    #[inline]
    pub fn new(rank: u8, local: u8) -> Self {
        Self((rank << DEVICE_BITS) | (local & DEVICE_BITS_MASK))
    }

    #[inline]
    pub fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u8 {
        self.0
    }

    /// Node rank, discarding the device bits
    #[inline]
    pub fn rank(self) -> u8 {
        self.0 >> DEVICE_BITS
    }

    /// Node-local device index, discarding the rank bits
    #[inline]
    pub fn local_index(self) -> u8 {
        self.0 & DEVICE_BITS_MASK
    }

    /// Dense 0-based number across the run
    #[inline]
    pub fn linear(self, devices_per_node: usize) -> usize {
        devices_per_node * self.rank() as usize + self.local_index() as usize
    }

    /// Inverse of `linear`
    #[inline]
    pub fn from_linear(number: usize, devices_per_node: usize) -> Self {
        Self::new(
            (number / devices_per_node) as u8,
            (number % devices_per_node) as u8,
        )
    }
}

impl std::fmt::Display for GlobalDeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.rank(), self.local_index())
    }
}
