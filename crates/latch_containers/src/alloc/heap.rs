use super::Allocator;
use crate::error::AllocError;
use std::{alloc::Layout, ptr::NonNull};

/// Allocator backed by the global Rust heap. Blocks come back zeroed.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

/// Shared heap allocator used by the convenience constructors.
pub static HEAP: HeapAllocator = HeapAllocator;

impl HeapAllocator {
    /// Alignment the system allocator hands out for any request.
    pub const MIN_ALIGN: usize = 16;
}

unsafe impl Allocator for HeapAllocator {
    fn alloc(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let layout = layout
            .align_to(Self::MIN_ALIGN)
            .map_err(|_| AllocError { size: layout.size(), align: layout.align() })?;
        if layout.size() == 0 {
            // Dangling but aligned; `free` ignores zero-sized layouts.
            return NonNull::new(layout.align() as *mut u8)
                .ok_or(AllocError { size: 0, align: layout.align() });
        }
        // SAFETY: the layout has a non-zero size.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or(AllocError { size: layout.size(), align: layout.align() })
    }

    unsafe fn free(&self, ptr: *mut u8, layout: Layout) {
        if ptr.is_null() || layout.size() == 0 {
            return;
        }
        // `alloc` widened the alignment; the same widening cannot fail here.
        if let Ok(layout) = layout.align_to(Self::MIN_ALIGN) {
            std::alloc::dealloc(ptr, layout);
        }
    }

    #[inline]
    fn alloc_zeroes_memory(&self) -> bool {
        true
    }

    #[inline]
    fn guaranteed_alignment(&self) -> usize {
        Self::MIN_ALIGN
    }
}
