//! Allocator capability shared by every container.
//!
//! Containers never own their allocator. They hold `&'a A`, so the borrow
//! checker rejects any container that would outlive the memory source it
//! draws from.

mod heap;
mod stack;
mod tracking;

pub use heap::{HeapAllocator, HEAP};
pub use stack::{StackAllocator, StackBuffer};
pub use tracking::TrackingAllocator;

use crate::error::{AllocError, ContainerError};
use std::{alloc::Layout, mem, ptr::NonNull};

/// A source of raw, unmanaged memory blocks.
///
/// # Safety
/// Implementors must return blocks that are valid for reads and writes of
/// `layout.size()` bytes, aligned to at least `layout.align()`, and disjoint
/// from every other live block. When `alloc_zeroes_memory` returns `true`,
/// every returned block must be zero-filled.
pub unsafe trait Allocator {
    /// Acquire a block described by `layout`.
    fn alloc(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Release a block previously returned by [`Allocator::alloc`]. Null is a no-op.
    ///
    /// # Safety
    /// `ptr` must come from this allocator's `alloc` with the same `layout`
    /// and must not be used afterwards.
    unsafe fn free(&self, ptr: *mut u8, layout: Layout);

    /// Whether blocks come back zero-filled.
    fn alloc_zeroes_memory(&self) -> bool;

    /// Minimum alignment of every returned block, regardless of the request.
    fn guaranteed_alignment(&self) -> usize;
}

/// Layout of `count` contiguous `T`s.
pub(crate) fn array_layout<T>(count: usize) -> Result<Layout, ContainerError> {
    Layout::array::<T>(count).map_err(|_| ContainerError::CapacityOverflow {
        requested: count,
        elem_size: mem::size_of::<T>(),
    })
}

/// One live block from an allocator, returned on drop.
///
/// Knows nothing about what lives inside; owners drop their elements first.
pub(crate) struct RawBlock<'a, A: Allocator + ?Sized> {
    ptr: NonNull<u8>,
    layout: Layout,
    alloc: &'a A,
}

impl<'a, A: Allocator + ?Sized> RawBlock<'a, A> {
    pub(crate) fn allocate(alloc: &'a A, layout: Layout) -> Result<Self, ContainerError> {
        match alloc.alloc(layout) {
            Ok(ptr) => {
                debug_assert_eq!(ptr.as_ptr() as usize % layout.align(), 0);
                Ok(Self { ptr, layout, alloc })
            }
            Err(err) => {
                tracing::warn!(
                    size = layout.size(),
                    align = layout.align(),
                    "allocator refused block"
                );
                Err(err.into())
            }
        }
    }

    #[inline]
    pub(crate) fn ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub(crate) fn allocator(&self) -> &'a A {
        self.alloc
    }

    #[inline]
    pub(crate) fn zeroed(&self) -> bool {
        self.alloc.alloc_zeroes_memory()
    }
}

impl<A: Allocator + ?Sized> Drop for RawBlock<'_, A> {
    fn drop(&mut self) {
        unsafe {
            // SAFETY: the block came from `self.alloc` with `self.layout` and is released once.
            self.alloc.free(self.ptr.as_ptr(), self.layout);
        }
    }
}
