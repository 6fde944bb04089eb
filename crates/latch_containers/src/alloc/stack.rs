use super::Allocator;
use crate::error::AllocError;
use std::{alloc::Layout, cell::Cell, marker::PhantomData, mem::MaybeUninit, ptr::NonNull};

/// Fixed-size scratch memory meant to live in a local variable.
///
/// ```ignore
/// let mut scratch = StackBuffer::<4096>::new();
/// let stack = StackAllocator::new(&mut scratch);
/// let mut ids = Array::<u32, _>::new_in(64, &stack)?;
/// ```
#[repr(C, align(16))]
pub struct StackBuffer<const N: usize> {
    bytes: [MaybeUninit<u8>; N],
}

impl<const N: usize> StackBuffer<N> {
    pub const fn new() -> Self {
        Self { bytes: [MaybeUninit::uninit(); N] }
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }
}

impl<const N: usize> Default for StackBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bump allocator over borrowed memory. `free` is a no-op.
///
/// Every container built on it borrows the allocator, which borrows the
/// buffer, so nothing allocated here can leave the frame owning the buffer.
pub struct StackAllocator<'buf> {
    start: NonNull<u8>,
    len: usize,
    offset: Cell<usize>,
    _buffer: PhantomData<&'buf mut [MaybeUninit<u8>]>,
}

impl<'buf> StackAllocator<'buf> {
    pub fn new<const N: usize>(buffer: &'buf mut StackBuffer<N>) -> Self {
        Self::from_slice(&mut buffer.bytes)
    }

    pub fn from_slice(mem: &'buf mut [MaybeUninit<u8>]) -> Self {
        Self {
            start: NonNull::new(mem.as_mut_ptr().cast::<u8>()).unwrap_or(NonNull::dangling()),
            len: mem.len(),
            offset: Cell::new(0),
            _buffer: PhantomData,
        }
    }

    /// Bytes handed out so far, including alignment padding.
    pub fn used(&self) -> usize {
        self.offset.get()
    }

    pub fn remaining(&self) -> usize {
        self.len - self.offset.get()
    }

    pub fn capacity(&self) -> usize {
        self.len
    }

    /// Rewind to the start of the buffer.
    ///
    /// Taking `&mut self` guarantees no container still borrows this allocator.
    pub fn reset(&mut self) {
        self.offset.set(0);
    }
}

unsafe impl Allocator for StackAllocator<'_> {
    fn alloc(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let refused = AllocError { size: layout.size(), align: layout.align() };
        let base = self.start.as_ptr() as usize;
        let cursor = base + self.offset.get();
        let aligned = cursor.checked_add(layout.align() - 1).ok_or(refused)? & !(layout.align() - 1);
        let end = aligned.checked_add(layout.size()).ok_or(refused)?;
        if end > base + self.len {
            return Err(refused);
        }
        self.offset.set(end - base);
        // SAFETY: `aligned - base` lies within the borrowed buffer.
        let ptr = unsafe { self.start.as_ptr().add(aligned - base) };
        NonNull::new(ptr).ok_or(refused)
    }

    #[inline]
    unsafe fn free(&self, _ptr: *mut u8, _layout: Layout) {}

    #[inline]
    fn alloc_zeroes_memory(&self) -> bool {
        false
    }

    fn guaranteed_alignment(&self) -> usize {
        let addr = self.start.as_ptr() as usize;
        (1usize << addr.trailing_zeros()).min(16)
    }
}
