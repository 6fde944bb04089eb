use super::Allocator;
use crate::error::AllocError;
use std::{alloc::Layout, cell::Cell, ptr::NonNull};

/// Allocator decorator that records traffic through an inner allocator.
///
/// Keeps a running per-frame byte count alongside lifetime totals so an
/// embedding loop can call [`TrackingAllocator::reset_frame`] once per tick.
pub struct TrackingAllocator<'a, A: Allocator + ?Sized> {
    inner: &'a A,
    alloc_count: Cell<usize>,
    free_count: Cell<usize>,
    live_bytes: Cell<usize>,
    peak_bytes: Cell<usize>,
    frame_bytes: Cell<usize>,
}

impl<'a, A: Allocator + ?Sized> TrackingAllocator<'a, A> {
    pub fn new(inner: &'a A) -> Self {
        Self {
            inner,
            alloc_count: Cell::new(0),
            free_count: Cell::new(0),
            live_bytes: Cell::new(0),
            peak_bytes: Cell::new(0),
            frame_bytes: Cell::new(0),
        }
    }

    /// Successful `alloc` calls.
    pub fn alloc_count(&self) -> usize {
        self.alloc_count.get()
    }

    /// Non-null `free` calls.
    pub fn free_count(&self) -> usize {
        self.free_count.get()
    }

    pub fn live_allocations(&self) -> usize {
        self.alloc_count.get() - self.free_count.get()
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.get()
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes.get()
    }

    /// Bytes allocated since the last [`TrackingAllocator::reset_frame`].
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes.get()
    }

    pub fn reset_frame(&self) {
        self.frame_bytes.set(0);
    }

    pub fn inner(&self) -> &'a A {
        self.inner
    }
}

unsafe impl<A: Allocator + ?Sized> Allocator for TrackingAllocator<'_, A> {
    fn alloc(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let ptr = self.inner.alloc(layout)?;
        let live = self.live_bytes.get() + layout.size();
        self.alloc_count.set(self.alloc_count.get() + 1);
        self.live_bytes.set(live);
        self.peak_bytes.set(self.peak_bytes.get().max(live));
        self.frame_bytes.set(self.frame_bytes.get() + layout.size());
        Ok(ptr)
    }

    unsafe fn free(&self, ptr: *mut u8, layout: Layout) {
        if ptr.is_null() {
            return;
        }
        self.free_count.set(self.free_count.get() + 1);
        self.live_bytes.set(self.live_bytes.get().saturating_sub(layout.size()));
        self.inner.free(ptr, layout);
    }

    #[inline]
    fn alloc_zeroes_memory(&self) -> bool {
        self.inner.alloc_zeroes_memory()
    }

    #[inline]
    fn guaranteed_alignment(&self) -> usize {
        self.inner.guaranteed_alignment()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{StackAllocator, StackBuffer, HEAP};

    #[test]
    fn test_counts_follow_traffic() {
        let tracker = TrackingAllocator::new(&HEAP);
        let layout = Layout::from_size_align(100, 4).unwrap();

        let a = tracker.alloc(layout).unwrap();
        let b = tracker.alloc(layout).unwrap();
        assert_eq!(tracker.alloc_count(), 2);
        assert_eq!(tracker.live_bytes(), 200);

        unsafe { tracker.free(a.as_ptr(), layout) };
        assert_eq!(tracker.live_allocations(), 1);
        assert_eq!(tracker.peak_bytes(), 200);

        unsafe { tracker.free(b.as_ptr(), layout) };
        unsafe { tracker.free(std::ptr::null_mut(), layout) };
        assert_eq!(tracker.free_count(), 2);
        assert_eq!(tracker.live_bytes(), 0);
    }

    #[test]
    fn test_frame_bytes_reset() {
        let tracker = TrackingAllocator::new(&HEAP);
        let layout = Layout::from_size_align(32, 8).unwrap();
        let p = tracker.alloc(layout).unwrap();
        assert_eq!(tracker.frame_bytes(), 32);
        tracker.reset_frame();
        assert_eq!(tracker.frame_bytes(), 0);
        assert_eq!(tracker.live_bytes(), 32);
        unsafe { tracker.free(p.as_ptr(), layout) };
    }

    #[test]
    fn test_forwards_capabilities() {
        let mut buf = StackBuffer::<64>::new();
        let stack = StackAllocator::new(&mut buf);
        let tracker = TrackingAllocator::new(&stack);
        assert!(!tracker.alloc_zeroes_memory());
        assert!(tracker.alloc(Layout::from_size_align(128, 8).unwrap()).is_err());
        assert_eq!(tracker.alloc_count(), 0);
    }
}
