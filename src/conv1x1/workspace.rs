//! 64-byte aligned, zero-initialized workspace buffers owned by a primitive
//! instance.

use std::alloc::Layout;
use std::marker::PhantomData;

use crate::types::{ConvError, ConvResult};

/// Fixed-size buffer of `T`, aligned to a cache line. Never resized.
pub struct AlignedBuffer<T> {
    ptr: *mut T,
    len: usize,
    layout: Option<Layout>,
    _marker: PhantomData<T>,
}

// Plain-data element types only; concurrent access is coordinated by the
// driver, which hands each tile a disjoint region.
unsafe impl<T: Send> Send for AlignedBuffer<T> {}
unsafe impl<T: Sync> Sync for AlignedBuffer<T> {}

impl<T: Copy> AlignedBuffer<T> {
    pub const ALIGN: usize = 64;

    /// Allocate `len` zeroed elements. `what` names the buffer in the error.
    pub fn zeroed(len: usize, what: &'static str) -> ConvResult<Self> {
        let bytes = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(ConvError::OutOfMemory { what, bytes: usize::MAX })?;
        if bytes == 0 {
            return Ok(AlignedBuffer {
                ptr: std::ptr::NonNull::dangling().as_ptr(),
                len,
                layout: None,
                _marker: PhantomData,
            });
        }
        let layout = Layout::from_size_align(bytes, Self::ALIGN)
            .map_err(|_| ConvError::OutOfMemory { what, bytes })?;
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) } as *mut T;
        if ptr.is_null() {
            return Err(ConvError::OutOfMemory { what, bytes });
        }
        log::trace!("allocated {what}: {bytes} bytes");
        Ok(AlignedBuffer { ptr, len, layout: Some(layout), _marker: PhantomData })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.ptr
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.ptr
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl<T> Drop for AlignedBuffer<T> {
    fn drop(&mut self) {
        if let Some(layout) = self.layout {
            unsafe { std::alloc::dealloc(self.ptr as *mut u8, layout) };
        }
    }
}
