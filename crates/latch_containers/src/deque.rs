//! Block-based double-ended queue.
//!
//! Elements live in fixed-size blocks tracked by an [`Array`] of block
//! pointers. Positions are absolute slots across the block list: slot `s`
//! lives in block `s / block_len` at offset `s % block_len`. Blocks are
//! attached lazily at either end and retired once a second idle block would
//! accumulate on that side, so each end keeps at most one spare.
//!
//! Elements never move once written, so growth at either end costs one block
//! allocation plus an update to the (small) block list.

use crate::alloc::{array_layout, Allocator, HeapAllocator, HEAP};
use crate::array::Array;
use crate::config::Settings;
use crate::error::ContainerError;
use std::{alloc::Layout, fmt, mem, ptr, ptr::NonNull};

/// Blocks never hold fewer elements than this, whatever the element size.
pub const MIN_BLOCK_ELEMENTS: usize = 128;

/// Elements per block for `T` given a target block size in bytes.
pub fn block_len_for<T>(block_bytes: usize) -> usize {
    let size = mem::size_of::<T>().max(1);
    if size <= block_bytes / MIN_BLOCK_ELEMENTS {
        block_bytes / size
    } else {
        MIN_BLOCK_ELEMENTS
    }
}

pub struct Deque<'a, T, A: Allocator + ?Sized = HeapAllocator> {
    blocks: Array<'a, NonNull<T>, A>,
    block_len: usize,
    block_layout: Layout,
    /// Absolute slot of the first element.
    head: usize,
    len: usize,
}

impl<T> Deque<'static, T, HeapAllocator> {
    pub fn new() -> Result<Self, ContainerError> {
        Self::new_in(&HEAP)
    }
}

impl<'a, T, A: Allocator + ?Sized> Deque<'a, T, A> {
    const INITIAL_BLOCK_SLOTS: usize = 4;

    pub fn new_in(alloc: &'a A) -> Result<Self, ContainerError> {
        Self::with_settings_in(alloc, &Settings::default())
    }

    /// Panics if `T` is zero-sized.
    pub fn with_settings_in(alloc: &'a A, settings: &Settings) -> Result<Self, ContainerError> {
        assert!(mem::size_of::<T>() != 0, "Deque does not support zero-sized types");
        let block_len = block_len_for::<T>(settings.deque.block_bytes.max(Settings::MIN_BLOCK_BYTES));
        Ok(Self {
            blocks: Array::with_settings_in(Self::INITIAL_BLOCK_SLOTS, alloc, settings)?,
            block_len,
            block_layout: array_layout::<T>(block_len)?,
            head: 0,
            len: 0,
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

    /// Elements per block.
    #[inline]
    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// Blocks currently attached, live or spare.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    fn total_slots(&self) -> usize {
        self.blocks.len() * self.block_len
    }

    /// Head position as (block index, in-block index).
    #[inline]
    pub fn head_position(&self) -> (usize, usize) {
        (self.head / self.block_len, self.head % self.block_len)
    }

    #[inline]
    fn slot(&self, pos: usize) -> *mut T {
        debug_assert!(pos < self.total_slots());
        // SAFETY: `pos` lies inside an attached block.
        unsafe { self.blocks[pos / self.block_len].as_ptr().add(pos % self.block_len) }
    }

    fn allocate_block(&self) -> Result<NonNull<T>, ContainerError> {
        let alloc = self.blocks.allocator();
        match alloc.alloc(self.block_layout) {
            Ok(ptr) => Ok(ptr.cast::<T>()),
            Err(err) => {
                tracing::warn!(bytes = self.block_layout.size(), "deque block allocation refused");
                Err(err.into())
            }
        }
    }

    fn free_block(&self, block: NonNull<T>) {
        unsafe {
            // SAFETY: every block came from this allocator with `block_layout` and holds no live values.
            self.blocks.allocator().free(block.as_ptr().cast::<u8>(), self.block_layout);
        }
    }

    fn attach_back(&mut self) -> Result<(), ContainerError> {
        let block = self.allocate_block()?;
        if let Err(err) = self.blocks.push(block) {
            self.free_block(block);
            return Err(err);
        }
        tracing::debug!(blocks = self.blocks.len(), "deque attached block at back");
        Ok(())
    }

    fn attach_front(&mut self) -> Result<(), ContainerError> {
        let block = self.allocate_block()?;
        if let Err(err) = self.blocks.prepend(block) {
            self.free_block(block);
            return Err(err);
        }
        self.head += self.block_len;
        tracing::debug!(blocks = self.blocks.len(), "deque attached block at front");
        Ok(())
    }

    pub fn push_back(&mut self, value: T) -> Result<(), ContainerError> {
        let pos = self.head + self.len;
        if pos == self.total_slots() {
            self.attach_back()?;
        }
        unsafe {
            // SAFETY: `pos` is inside an attached block and holds no live value.
            ptr::write(self.slot(pos), value);
        }
        self.len += 1;
        Ok(())
    }

    pub fn push_front(&mut self, value: T) -> Result<(), ContainerError> {
        if self.head == 0 {
            self.attach_front()?;
        }
        self.head -= 1;
        unsafe {
            // SAFETY: the slot before the old head is attached and dead.
            ptr::write(self.slot(self.head), value);
        }
        self.len += 1;
        Ok(())
    }

    /// Construct the new back element in place.
    pub fn emplace_back_with<F: FnOnce() -> T>(&mut self, f: F) -> Result<&mut T, ContainerError> {
        self.push_back(f())?;
        let pos = self.head + self.len - 1;
        // SAFETY: the slot was just written.
        Ok(unsafe { &mut *self.slot(pos) })
    }

    pub fn emplace_front_with<F: FnOnce() -> T>(&mut self, f: F) -> Result<&mut T, ContainerError> {
        self.push_front(f())?;
        // SAFETY: the head slot was just written.
        Ok(unsafe { &mut *self.slot(self.head) })
    }

    pub fn pop_back(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        // SAFETY: the old last slot was live and is now unlinked.
        let value = unsafe { ptr::read(self.slot(self.head + self.len)) };
        self.retire_back();
        Some(value)
    }

    pub fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        // SAFETY: the head slot was live and is now unlinked.
        let value = unsafe { ptr::read(self.slot(self.head)) };
        self.head += 1;
        self.len -= 1;
        self.retire_front();
        Some(value)
    }

    /// Free the last block once two idle blocks trail the live range.
    fn retire_back(&mut self) {
        let last_used = if self.len == 0 {
            self.head / self.block_len
        } else {
            (self.head + self.len - 1) / self.block_len
        };
        let spare = self.blocks.len().saturating_sub(last_used + 1);
        if spare > 1 {
            if let Some(block) = self.blocks.pop() {
                self.free_block(block);
                tracing::debug!(blocks = self.blocks.len(), "deque retired block at back");
            }
        }
    }

    /// Free the first block once two idle blocks precede the live range.
    fn retire_front(&mut self) {
        if self.head / self.block_len > 1 {
            let block = self.blocks.remove_one(0);
            self.free_block(block);
            self.head -= self.block_len;
            tracing::debug!(blocks = self.blocks.len(), "deque retired block at front");
        }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        // SAFETY: positions head..head+len are live.
        Some(unsafe { &*self.slot(self.head + index) })
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.len {
            return None;
        }
        // SAFETY: as in `get`; `&mut self` makes the borrow unique.
        Some(unsafe { &mut *self.slot(self.head + index) })
    }

    pub fn front(&self) -> Option<&T> {
        self.get(0)
    }

    pub fn back(&self) -> Option<&T> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }

    /// Drop every element head to tail and free every block but the first.
    pub fn clear(&mut self) {
        let (head, len) = (self.head, self.len);
        self.len = 0;
        self.head = 0;
        if mem::needs_drop::<T>() {
            for pos in head..head + len {
                unsafe {
                    // SAFETY: each live slot is dropped exactly once.
                    ptr::drop_in_place(self.slot(pos));
                }
            }
        }
        while self.blocks.len() > 1 {
            if let Some(block) = self.blocks.pop() {
                self.free_block(block);
            }
        }
    }
}

impl<T, A: Allocator + ?Sized> Drop for Deque<'_, T, A> {
    fn drop(&mut self) {
        self.clear();
        if let Some(block) = self.blocks.pop() {
            self.free_block(block);
        }
    }
}

impl<T: fmt::Debug, A: Allocator + ?Sized> fmt::Debug for Deque<'_, T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::TrackingAllocator;
    use std::rc::Rc;

    fn small_blocks() -> Settings {
        let mut settings = Settings::default();
        settings.deque.block_bytes = 128 * 4;
        settings
    }

    #[test]
    fn test_block_len_rules() {
        assert_eq!(block_len_for::<u8>(32 * 1024), 32 * 1024);
        assert_eq!(block_len_for::<u64>(32 * 1024), 4096);
        assert_eq!(block_len_for::<[u8; 256]>(32 * 1024), 128);
        assert_eq!(block_len_for::<[u8; 1024]>(32 * 1024), 128);
    }

    #[test]
    fn test_push_pop_both_ends() {
        let mut d = Deque::<u32>::new().unwrap();
        d.push_back(1).unwrap();
        d.push_back(2).unwrap();
        d.push_front(0).unwrap();
        assert_eq!(d.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(d.front(), Some(&0));
        assert_eq!(d.back(), Some(&2));
        assert_eq!(d.pop_front(), Some(0));
        assert_eq!(d.pop_back(), Some(2));
        assert_eq!(d.pop_back(), Some(1));
        assert_eq!(d.pop_back(), None);
        assert_eq!(d.pop_front(), None);
    }

    #[test]
    fn test_spans_many_blocks_back() {
        let mut d = Deque::<u32, _>::with_settings_in(&HEAP, &small_blocks()).unwrap();
        assert_eq!(d.block_len(), 128);
        for i in 0..1000 {
            d.push_back(i).unwrap();
        }
        assert_eq!(d.block_count(), 8);
        for i in 0..1000 {
            assert_eq!(d.get(i as usize), Some(&i));
        }
        for i in (0..1000).rev() {
            assert_eq!(d.pop_back(), Some(i));
        }
        // The head block stays, plus at most one spare behind it.
        assert!(d.block_count() <= 2);
    }

    #[test]
    fn test_spans_many_blocks_front() {
        let mut d = Deque::<u32, _>::with_settings_in(&HEAP, &small_blocks()).unwrap();
        for i in 0..1000 {
            d.push_front(i).unwrap();
        }
        assert_eq!(d.front(), Some(&999));
        assert_eq!(d.back(), Some(&0));
        for i in (0..1000).rev() {
            assert_eq!(d.pop_front(), Some(i));
        }
        assert!(d.block_count() <= 2);
    }

    #[test]
    fn test_queue_usage_keeps_block_count_bounded() {
        let tracker = TrackingAllocator::new(&HEAP);
        let mut d = Deque::<u32, _>::with_settings_in(&tracker, &small_blocks()).unwrap();
        for i in 0..10_000 {
            d.push_back(i).unwrap();
            if i >= 64 {
                assert_eq!(d.pop_front(), Some(i - 64));
            }
            assert!(d.block_count() <= 4, "block count {} at step {i}", d.block_count());
        }
        drop(d);
        assert_eq!(tracker.live_bytes(), 0);
    }

    #[test]
    fn test_clear_keeps_first_block() {
        let tracker = TrackingAllocator::new(&HEAP);
        let marker = Rc::new(());
        let mut d = Deque::with_settings_in(&tracker, &small_blocks()).unwrap();
        for _ in 0..300 {
            d.push_back(marker.clone()).unwrap();
        }
        for _ in 0..20 {
            d.push_front(marker.clone()).unwrap();
        }
        assert_eq!(Rc::strong_count(&marker), 321);
        d.clear();
        assert_eq!(Rc::strong_count(&marker), 1);
        assert_eq!(d.block_count(), 1);
        assert!(d.is_empty());
        d.push_front(marker.clone()).unwrap();
        d.push_back(marker.clone()).unwrap();
        assert_eq!(d.len(), 2);
        drop(d);
        assert_eq!(Rc::strong_count(&marker), 1);
        assert_eq!(tracker.live_bytes(), 0);
    }

    #[test]
    fn test_emplace_and_get_mut() {
        let mut d = Deque::<(u8, u8)>::new().unwrap();
        d.emplace_back_with(|| (1, 1)).unwrap().1 = 2;
        d.emplace_front_with(|| (0, 0)).unwrap();
        d.get_mut(0).unwrap().0 = 7;
        assert_eq!(d.iter().copied().collect::<Vec<_>>(), vec![(7, 0), (1, 2)]);
        assert_eq!(d.head_position().1, d.block_len() - 1);
    }
}
