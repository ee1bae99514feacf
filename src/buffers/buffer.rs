//! Typed, optionally double-buffered particle arrays.
//!
//! `AbstractBuffer` is the untyped capability set every buffer exposes to the
//! collection. Its default methods are the "generic buffer" behavior: static
//! queries return zero and every operation that needs a concrete element
//! type reports `SimError::Unsupported`. `GenericBuffer<T>` is the concrete
//! storage for one element type.

use std::any::Any;

use bytemuck::Pod;

use crate::error::{allocation_error, unsupported, SimError, SimResult};
use crate::flags::Flag;

/// Untyped view of a buffer owned by a `BufferList`
pub trait AbstractBuffer: Send + Sync {
    /// Identity of the buffer family
    fn key(&self) -> Flag;

    /// Size in bytes of one element
    fn element_size(&self) -> usize {
        0
    }

    /// Number of parallel arrays (1 or 2)
    fn array_count(&self) -> usize {
        0
    }

    /// Elements per array, 0 until allocated
    fn len(&self) -> usize {
        0
    }

    fn is_allocated(&self) -> bool {
        self.len() > 0
    }

    fn name(&self) -> SimResult<&'static str> {
        Err(unsupported("name query", "AbstractBuffer"))
    }

    /// Allocate every array for `elems` elements, returning the bytes allocated
    fn alloc(&mut self, _elems: usize) -> SimResult<usize> {
        Err(unsupported("alloc", "AbstractBuffer"))
    }

    /// Raw bytes of one array, `None` if out of range or unallocated
    fn bytes(&self, _slot: usize) -> Option<&[u8]> {
        None
    }

    fn bytes_mut(&mut self, _slot: usize) -> Option<&mut [u8]> {
        None
    }

    /// Raw bytes of one array starting at element `offset`
    fn offset_bytes(&self, _slot: usize, _offset: usize) -> SimResult<Option<&[u8]>> {
        Err(unsupported("offset access", "AbstractBuffer"))
    }

    /// Exchange elements `a` and `b` of array `slot`
    fn swap_elements(&mut self, _a: usize, _b: usize, _slot: usize) -> SimResult<()> {
        Err(unsupported("element swap", "AbstractBuffer"))
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Storage for one buffer family with a fixed element type
#[derive(Debug)]
pub struct GenericBuffer<T: Pod> {
    key: Flag,
    name: &'static str,
    /// One entry per slot, `None` until allocated
    arrays: Vec<Option<Vec<T>>>,
    /// Byte pattern written over freshly allocated arrays
    init: i32,
    elems: usize,
}

impl<T: Pod + Send + Sync> GenericBuffer<T> {
    /// Only the registry builds buffers, so key, element type and slot count
    /// always agree. Use `BufferTrait::buffer` from outside this module tree.
    pub(super) fn new(key: Flag, name: &'static str, slots: usize, init: i32) -> Self {
        debug_assert!(slots == 1 || slots == 2, "{} declares {} slots", name, slots);
        Self {
            key,
            name,
            arrays: (0..slots).map(|_| None).collect(),
            init,
            elems: 0,
        }
    }

    pub fn init_value(&self) -> i32 {
        self.init
    }

    /// Typed view of one array
    pub fn get(&self, slot: usize) -> Option<&[T]> {
        self.arrays.get(slot)?.as_deref()
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut [T]> {
        self.arrays.get_mut(slot)?.as_deref_mut()
    }

    /// Typed view of one array starting at element `offset`
    pub fn get_offset(&self, slot: usize, offset: usize) -> Option<&[T]> {
        self.get(slot)?.get(offset..)
    }

    pub fn get_offset_mut(&mut self, slot: usize, offset: usize) -> Option<&mut [T]> {
        self.get_mut(slot)?.get_mut(offset..)
    }

    /// Read one slot while writing the other one
    pub fn read_write(&mut self, read: usize, write: usize) -> Option<(&[T], &mut [T])> {
        if read == write || read >= self.arrays.len() || write >= self.arrays.len() {
            return None;
        }
        let (low, high) = self.arrays.split_at_mut(read.max(write));
        let (first, second) = (low[read.min(write)].as_deref_mut()?, high[0].as_deref_mut()?);
        if read < write {
            Some((&*first, second))
        } else {
            Some((&*second, first))
        }
    }

    /// Bytes of one array of `elems` elements
    fn array_bytes(&self, elems: usize) -> SimResult<usize> {
        let size = std::mem::size_of::<T>();
        elems.checked_mul(size).ok_or_else(|| {
            allocation_error(
                self.name,
                usize::MAX,
                format!("{} elements of {} bytes overflow the address space", elems, size),
            )
        })
    }

    fn allocate_array(&self, elems: usize, bytes: usize) -> SimResult<Vec<T>> {
        let mut array: Vec<T> = Vec::new();
        array
            .try_reserve_exact(elems)
            .map_err(|e| allocation_error(self.name, bytes, e))?;
        array.resize(elems, T::zeroed());
        // memset semantics: the init value is a byte pattern, not an element
        bytemuck::cast_slice_mut::<T, u8>(&mut array).fill(self.init as u8);
        Ok(array)
    }
}

impl<T: Pod + Send + Sync> AbstractBuffer for GenericBuffer<T> {
    fn key(&self) -> Flag {
        self.key
    }

    fn element_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    fn array_count(&self) -> usize {
        self.arrays.len()
    }

    fn len(&self) -> usize {
        self.elems
    }

    fn name(&self) -> SimResult<&'static str> {
        Ok(self.name)
    }

    fn alloc(&mut self, elems: usize) -> SimResult<usize> {
        let bytes = self.array_bytes(elems)?;
        let total = bytes
            .checked_mul(self.arrays.len())
            .ok_or_else(|| allocation_error(self.name, usize::MAX, "total size overflows the address space"))?;

        let mut arrays = Vec::with_capacity(self.arrays.len());
        for _ in 0..self.arrays.len() {
            arrays.push(Some(self.allocate_array(elems, bytes)?));
        }
        self.arrays = arrays;
        self.elems = elems;

        log::debug!(
            "[GenericBuffer] Allocated {} x {} elements for {} ({} bytes)",
            self.array_count(),
            elems,
            self.name,
            total
        );
        Ok(total)
    }

    fn bytes(&self, slot: usize) -> Option<&[u8]> {
        self.get(slot).map(bytemuck::cast_slice)
    }

    fn bytes_mut(&mut self, slot: usize) -> Option<&mut [u8]> {
        self.get_mut(slot).map(bytemuck::cast_slice_mut)
    }

    fn offset_bytes(&self, slot: usize, offset: usize) -> SimResult<Option<&[u8]>> {
        Ok(self.get_offset(slot, offset).map(bytemuck::cast_slice))
    }

    fn swap_elements(&mut self, a: usize, b: usize, slot: usize) -> SimResult<()> {
        let (key, name, len, slots) = (self.key, self.name, self.elems, self.arrays.len());
        match self.get_mut(slot) {
            Some(array) if a < len && b < len => {
                array.swap(a, b);
                Ok(())
            }
            Some(_) => Err(SimError::Unsupported {
                operation: "element swap out of bounds",
                buffer: format!("{} ({} vs {} elements)", name, a.max(b), len),
            }),
            None => Err(SimError::SlotOutOfRange { key, slot, slots }),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
