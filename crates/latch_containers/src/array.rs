//! Contiguous growable array built directly on an [`Allocator`].
//!
//! Elements live in a single block. Growth allocates a larger block, moves
//! the live elements across with one bulk copy, and frees the old block; Rust
//! moves are bitwise for every type, so no per-element relocation runs.
//!
//! When the allocator hands out zeroed memory the array keeps every slot past
//! `len` zeroed ("tail-zero tracking"). [`Array::resize_zeroed`] can then grow
//! without touching memory.

use crate::alloc::{array_layout, Allocator, HeapAllocator, RawBlock, HEAP};
use crate::config::Settings;
use crate::error::ContainerError;
use bytemuck::Zeroable;
use std::{
    fmt,
    marker::PhantomData,
    mem,
    ops::{Deref, DerefMut},
    ptr, slice,
};

pub struct Array<'a, T, A: Allocator + ?Sized = HeapAllocator> {
    block: RawBlock<'a, A>,
    cap: usize,
    len: usize,
    tail_zeroed: bool,
    growth: usize,
    _marker: PhantomData<T>,
}

impl<T> Array<'static, T, HeapAllocator> {
    /// Create an array on the shared heap allocator.
    pub fn new(capacity: usize) -> Result<Self, ContainerError> {
        Self::new_in(capacity, &HEAP)
    }
}

impl<'a, T, A: Allocator + ?Sized> Array<'a, T, A> {
    /// Create an array with room for `capacity` elements, reserved immediately.
    ///
    /// Panics if `capacity` is zero or `T` is zero-sized.
    pub fn new_in(capacity: usize, alloc: &'a A) -> Result<Self, ContainerError> {
        Self::with_settings_in(capacity, alloc, &Settings::default())
    }

    pub fn with_settings_in(
        capacity: usize,
        alloc: &'a A,
        settings: &Settings,
    ) -> Result<Self, ContainerError> {
        assert!(capacity > 0, "Array capacity must be greater than zero");
        assert!(mem::size_of::<T>() != 0, "Array does not support zero-sized types");
        let block = RawBlock::allocate(alloc, array_layout::<T>(capacity)?)?;
        Ok(Self {
            tail_zeroed: block.zeroed(),
            block,
            cap: capacity,
            len: 0,
            growth: settings.growth.factor.max(Settings::MIN_GROWTH_FACTOR),
            _marker: PhantomData,
        })
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
    pub fn capacity(&self) -> usize {
        self.cap
    }

    #[inline]
    pub fn allocator(&self) -> &'a A {
        self.block.allocator()
    }

    /// Base address of the elements. Invalidated by any call that reallocates.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.block.ptr().cast::<T>()
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.block.ptr().cast::<T>()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: slots 0..len are initialized.
        unsafe { slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: slots 0..len are initialized and uniquely borrowed.
        unsafe { slice::from_raw_parts_mut(self.as_mut_ptr(), self.len) }
    }

    /// Ensure room for `capacity` elements.
    ///
    /// Returns `true` when the buffer moved, which invalidates any address
    /// previously taken from [`Array::as_ptr`].
    pub fn reserve(&mut self, capacity: usize) -> Result<bool, ContainerError> {
        if capacity <= self.cap {
            return Ok(false);
        }
        let block = RawBlock::allocate(self.allocator(), array_layout::<T>(capacity)?)?;
        unsafe {
            // SAFETY: both blocks hold at least `len` slots and do not overlap.
            ptr::copy_nonoverlapping(self.as_ptr(), block.ptr().cast::<T>(), self.len);
        }
        tracing::debug!(
            from = self.cap,
            to = capacity,
            len = self.len,
            elem_size = mem::size_of::<T>(),
            "array relocated"
        );
        self.tail_zeroed = block.zeroed();
        // The old block is released without dropping anything; its elements moved.
        self.block = block;
        self.cap = capacity;
        Ok(true)
    }

    /// Make room for `additional` more elements, multiplying capacity by the growth factor.
    fn grow_for(&mut self, additional: usize) -> Result<(), ContainerError> {
        let required = self.len.checked_add(additional).ok_or(ContainerError::CapacityOverflow {
            requested: usize::MAX,
            elem_size: mem::size_of::<T>(),
        })?;
        if required > self.cap {
            self.reserve(required.max(self.cap.saturating_mul(self.growth)))?;
        }
        Ok(())
    }

    /// Zero `count` dead slots starting at `start` when tail-zero tracking is active.
    #[inline]
    fn rezero(&mut self, start: usize, count: usize) {
        if self.tail_zeroed && count > 0 {
            unsafe {
                // SAFETY: the range lies within capacity and holds no live values.
                ptr::write_bytes(self.as_mut_ptr().add(start), 0, count);
            }
        }
    }

    /// Append a value. Amortized O(1).
    pub fn push(&mut self, value: T) -> Result<(), ContainerError> {
        self.grow_for(1)?;
        unsafe {
            // SAFETY: `len < cap` after growth; the slot is dead.
            ptr::write(self.as_mut_ptr().add(self.len), value);
        }
        self.len += 1;
        Ok(())
    }

    /// Construct the new tail element in place.
    pub fn emplace_back_with<F: FnOnce() -> T>(&mut self, f: F) -> Result<&mut T, ContainerError> {
        self.grow_for(1)?;
        let index = self.len;
        unsafe {
            // SAFETY: `index < cap` after growth; the slot is dead.
            let slot = self.as_mut_ptr().add(index);
            ptr::write(slot, f());
            self.len += 1;
            Ok(&mut *slot)
        }
    }

    /// Insert at the front. O(len): every element shifts by one slot.
    pub fn prepend(&mut self, value: T) -> Result<(), ContainerError> {
        self.insert(0, value)
    }

    /// Insert at `index`, shifting later elements up. Panics if `index > len`.
    pub fn insert(&mut self, index: usize, value: T) -> Result<(), ContainerError> {
        assert!(index <= self.len, "insert index {index} out of bounds (len {})", self.len);
        self.grow_for(1)?;
        unsafe {
            let p = self.as_mut_ptr().add(index);
            // SAFETY: `len + 1 <= cap`, so the shifted range stays in bounds.
            ptr::copy(p, p.add(1), self.len - index);
            ptr::write(p, value);
        }
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        // SAFETY: slot `len` was live and is now outside the logical length.
        let value = unsafe { ptr::read(self.as_ptr().add(self.len)) };
        self.rezero(self.len, 1);
        Some(value)
    }

    /// Remove `count` elements starting at `index`, closing the gap.
    ///
    /// Panics if the range extends past `len`.
    pub fn remove(&mut self, index: usize, count: usize) {
        assert!(
            index <= self.len && count <= self.len - index,
            "remove range {index}..{} out of bounds (len {})",
            index.saturating_add(count),
            self.len
        );
        if count == 0 {
            return;
        }
        let old_len = self.len;
        // A panicking destructor leaks the tail instead of double-dropping it.
        self.len = index;
        unsafe {
            let p = self.as_mut_ptr().add(index);
            if mem::needs_drop::<T>() {
                ptr::drop_in_place(ptr::slice_from_raw_parts_mut(p, count));
            }
            ptr::copy(p.add(count), p, old_len - index - count);
        }
        self.len = old_len - count;
        self.rezero(self.len, count);
    }

    /// Remove and return the element at `index`, shifting later elements down.
    pub fn remove_one(&mut self, index: usize) -> T {
        assert!(index < self.len, "remove index {index} out of bounds (len {})", self.len);
        let value = unsafe {
            let p = self.as_mut_ptr().add(index);
            let value = ptr::read(p);
            ptr::copy(p.add(1), p, self.len - index - 1);
            value
        };
        self.len -= 1;
        self.rezero(self.len, 1);
        value
    }

    /// Remove the element at `index`, moving the last element into its slot. O(1).
    pub fn swap_remove(&mut self, index: usize) -> T {
        assert!(index < self.len, "swap_remove index {index} out of bounds (len {})", self.len);
        let last = self.len - 1;
        let value = unsafe {
            let base = self.as_mut_ptr();
            let value = ptr::read(base.add(index));
            if index != last {
                ptr::copy_nonoverlapping(base.add(last), base.add(index), 1);
            }
            value
        };
        self.len = last;
        self.rezero(last, 1);
        value
    }

    /// Shorten to `len`, dropping the excluded elements.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }
        let excess = self.len - len;
        self.len = len;
        if mem::needs_drop::<T>() {
            unsafe {
                // SAFETY: the excluded range was live and is no longer reachable.
                ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.as_mut_ptr().add(len), excess));
            }
        }
        self.rezero(len, excess);
    }

    /// Drop every element and reset the length to zero. Capacity is kept.
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Resize to `len`, filling new slots with values produced by `f`.
    pub fn resize_with<F: FnMut() -> T>(&mut self, len: usize, mut f: F) -> Result<(), ContainerError> {
        if len <= self.len {
            self.truncate(len);
            return Ok(());
        }
        self.grow_for(len - self.len)?;
        while self.len < len {
            unsafe {
                // SAFETY: `len <= cap`; slot `self.len` is dead.
                ptr::write(self.as_mut_ptr().add(self.len), f());
            }
            self.len += 1;
        }
        Ok(())
    }

    /// Resize to `len`, cloning `value` into new slots.
    pub fn resize(&mut self, len: usize, value: T) -> Result<(), ContainerError>
    where
        T: Clone,
    {
        self.resize_with(len, || value.clone())
    }

    /// Resize to `len`, filling new slots with zero bytes.
    ///
    /// Skips the fill entirely when the unused tail is already known to be
    /// zero.
    pub fn resize_zeroed(&mut self, len: usize) -> Result<(), ContainerError>
    where
        T: Zeroable,
    {
        if len <= self.len {
            self.truncate(len);
            return Ok(());
        }
        self.grow_for(len - self.len)?;
        if !self.tail_zeroed {
            unsafe {
                // SAFETY: `len <= cap`; the range is dead, and all-zero is a valid `T`.
                ptr::write_bytes(self.as_mut_ptr().add(self.len), 0, len - self.len);
            }
        }
        self.len = len;
        Ok(())
    }

    /// Append a copy of `items` with a single memcpy.
    pub fn extend_from_copy_slice(&mut self, items: &[T]) -> Result<(), ContainerError>
    where
        T: Copy,
    {
        self.grow_for(items.len())?;
        unsafe {
            // SAFETY: room for `items.len()` was reserved; `items` cannot alias our dead tail.
            ptr::copy_nonoverlapping(items.as_ptr(), self.as_mut_ptr().add(self.len), items.len());
        }
        self.len += items.len();
        Ok(())
    }

    /// Append clones of `items`, one element at a time.
    pub fn extend_from_slice(&mut self, items: &[T]) -> Result<(), ContainerError>
    where
        T: Clone,
    {
        self.grow_for(items.len())?;
        for item in items {
            unsafe {
                // SAFETY: room was reserved above.
                ptr::write(self.as_mut_ptr().add(self.len), item.clone());
            }
            self.len += 1;
        }
        Ok(())
    }
}

impl<T, A: Allocator + ?Sized> Drop for Array<'_, T, A> {
    fn drop(&mut self) {
        if mem::needs_drop::<T>() {
            unsafe {
                // SAFETY: slots 0..len are live; the block is released afterwards by `RawBlock`.
                ptr::drop_in_place(self.as_mut_slice() as *mut [T]);
            }
        }
    }
}

impl<T, A: Allocator + ?Sized> Deref for Array<'_, T, A> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T, A: Allocator + ?Sized> DerefMut for Array<'_, T, A> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<'s, T, A: Allocator + ?Sized> IntoIterator for &'s Array<'_, T, A> {
    type Item = &'s T;
    type IntoIter = slice::Iter<'s, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_slice().iter()
    }
}

impl<'s, T, A: Allocator + ?Sized> IntoIterator for &'s mut Array<'_, T, A> {
    type Item = &'s mut T;
    type IntoIter = slice::IterMut<'s, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_mut_slice().iter_mut()
    }
}

impl<T: fmt::Debug, A: Allocator + ?Sized> fmt::Debug for Array<'_, T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
