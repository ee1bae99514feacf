//! Keyed collection of buffers
//!
//! A `BufferList` is the sole owner of its buffers. Keys are unique; the map
//! is ordered by key so iteration follows the control-word bit order.

use std::collections::BTreeMap;

use crate::buffers::buffer::AbstractBuffer;
use crate::buffers::traits::{buffer_info, Buffer, BufferTrait};
use crate::error::{SimError, SimResult};
use crate::flags::{self, Flag};
use crate::util::mem_string;

#[derive(Default)]
pub struct BufferList {
    buffers: BTreeMap<Flag, Box<dyn AbstractBuffer>>,
}

impl BufferList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `buffer`.
    ///
    /// Fails with `FamilyMismatch` unless `buffer` was built for its key by
    /// the registry, and with `DuplicateKey` if a buffer with the same key is
    /// already present. In both cases the list is left untouched and
    /// `buffer` is dropped.
    pub fn insert(&mut self, buffer: Box<dyn AbstractBuffer>) -> SimResult<()> {
        let key = buffer.key();
        let info = buffer_info(key).ok_or(SimError::UnknownBuffer { key })?;
        if !info.matches(buffer.as_ref()) {
            return Err(SimError::FamilyMismatch {
                key,
                name: info.name,
                element_size: buffer.element_size(),
                slots: buffer.array_count(),
            });
        }
        if self.buffers.contains_key(&key) {
            log::warn!("[BufferList] Refusing duplicate buffer {} ({:#010x})", info.name, key);
            return Err(SimError::DuplicateKey { key, name: info.name });
        }
        self.buffers.insert(key, buffer);
        Ok(())
    }

    /// Add an unallocated buffer for the family `K`
    pub fn add<K: BufferTrait>(&mut self, init: i32) -> SimResult<()> {
        self.insert(Box::new(K::buffer(init)))
    }

    /// Add an unallocated buffer for a key only known at runtime
    pub fn add_key(&mut self, key: Flag, init: i32) -> SimResult<()> {
        let info = buffer_info(key).ok_or(SimError::UnknownBuffer { key })?;
        self.insert(info.create(init))
    }

    /// Add one buffer for every family in `mask`
    pub fn add_mask(&mut self, mask: Flag, init: i32) -> SimResult<()> {
        for key in flags::iter_buffers(mask) {
            self.add_key(key, init)?;
        }
        Ok(())
    }

    pub fn get(&self, key: Flag) -> Option<&dyn AbstractBuffer> {
        self.buffers.get(&key).map(|buffer| buffer.as_ref())
    }

    pub fn get_mut(&mut self, key: Flag) -> Option<&mut (dyn AbstractBuffer + 'static)> {
        self.buffers.get_mut(&key).map(|buffer| buffer.as_mut())
    }

    pub fn contains(&self, key: Flag) -> bool {
        self.buffers.contains_key(&key)
    }

    /// Typed access to the buffer of family `K`
    pub fn get_buffer<K: BufferTrait>(&self) -> Option<&Buffer<K>> {
        self.buffers.get(&K::KEY)?.as_any().downcast_ref::<Buffer<K>>()
    }

    pub fn get_buffer_mut<K: BufferTrait>(&mut self) -> Option<&mut Buffer<K>> {
        self.buffers
            .get_mut(&K::KEY)?
            .as_any_mut()
            .downcast_mut::<Buffer<K>>()
    }

    /// Typed view of array `slot` of family `K`
    pub fn get_buffer_data<K: BufferTrait>(&self, slot: usize) -> Option<&[K::Element]> {
        self.get_buffer::<K>()?.get(slot)
    }

    pub fn get_buffer_data_mut<K: BufferTrait>(
        &mut self,
        slot: usize,
    ) -> Option<&mut [K::Element]> {
        self.get_buffer_mut::<K>()?.get_mut(slot)
    }

    /// Allocate every owned buffer for `elems` elements.
    ///
    /// Returns the total number of bytes allocated. The first failure is
    /// returned as is; allocation failures are fatal for the caller.
    pub fn alloc_all(&mut self, elems: usize) -> SimResult<usize> {
        let mut total = 0;
        for buffer in self.buffers.values_mut() {
            total += buffer.alloc(elems)?;
        }
        log::info!(
            "[BufferList] Allocated {} buffers for {} elements: {}",
            self.buffers.len(),
            elems,
            mem_string(total)
        );
        Ok(total)
    }

    /// Remove and return the buffer for `key`
    pub fn remove(&mut self, key: Flag) -> Option<Box<dyn AbstractBuffer>> {
        self.buffers.remove(&key)
    }

    /// Destroy every owned buffer
    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Combined mask of every key present
    pub fn keys_mask(&self) -> Flag {
        self.buffers.keys().fold(flags::NO_FLAGS, |mask, key| mask | key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Flag, &dyn AbstractBuffer)> {
        self.buffers.iter().map(|(key, buffer)| (*key, buffer.as_ref()))
    }
}

impl std::fmt::Debug for BufferList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.buffers.values().map(|buffer| buffer.name().unwrap_or("?")))
            .finish()
    }
}
