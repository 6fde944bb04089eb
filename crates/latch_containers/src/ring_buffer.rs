//! Fixed-capacity circular buffer over a single allocation.

use crate::alloc::{array_layout, Allocator, HeapAllocator, RawBlock, HEAP};
use crate::error::ContainerError;
use std::{fmt, marker::PhantomData, mem, ptr};

/// Double-ended circular buffer that never grows.
///
/// Inserting into a full buffer hands the value back as `Err`; popping an
/// empty buffer returns `None`.
pub struct RingBuffer<'a, T, A: Allocator + ?Sized = HeapAllocator> {
    block: RawBlock<'a, A>,
    capacity: usize,
    head: usize,
    tail: usize,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T> RingBuffer<'static, T, HeapAllocator> {
    pub fn new(capacity: usize) -> Result<Self, ContainerError> {
        Self::new_in(capacity, &HEAP)
    }
}

impl<'a, T, A: Allocator + ?Sized> RingBuffer<'a, T, A> {
    /// Panics if `capacity` is zero or `T` is zero-sized.
    pub fn new_in(capacity: usize, alloc: &'a A) -> Result<Self, ContainerError> {
        assert!(capacity > 0, "RingBuffer capacity must be greater than zero");
        assert!(mem::size_of::<T>() != 0, "RingBuffer does not support zero-sized types");
        Ok(Self {
            block: RawBlock::allocate(alloc, array_layout::<T>(capacity)?)?,
            capacity,
            head: 0,
            tail: 0,
            len: 0,
            _marker: PhantomData,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
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
    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    #[inline]
    fn slot(&self, index: usize) -> *mut T {
        debug_assert!(index < self.capacity);
        // SAFETY: `index < capacity` keeps the pointer inside the block.
        unsafe { self.block.ptr().cast::<T>().add(index) }
    }

    #[inline]
    fn wrap_add(&self, index: usize, offset: usize) -> usize {
        let i = index + offset;
        if i >= self.capacity {
            i - self.capacity
        } else {
            i
        }
    }

    #[inline]
    fn wrap_sub_one(&self, index: usize) -> usize {
        if index == 0 {
            self.capacity - 1
        } else {
            index - 1
        }
    }

    /// Write at the tail. The caller has checked the buffer is not full.
    #[inline]
    fn write_back(&mut self, value: T) {
        debug_assert!(!self.is_full());
        unsafe {
            // SAFETY: the buffer is not full, so the tail slot is dead.
            ptr::write(self.slot(self.tail), value);
        }
        self.tail = self.wrap_add(self.tail, 1);
        self.len += 1;
    }

    /// Write before the head. The caller has checked the buffer is not full.
    #[inline]
    fn write_front(&mut self, value: T) {
        debug_assert!(!self.is_full());
        self.head = self.wrap_sub_one(self.head);
        unsafe {
            // SAFETY: the buffer is not full, so the slot before head is dead.
            ptr::write(self.slot(self.head), value);
        }
        self.len += 1;
    }

    pub fn push_back(&mut self, value: T) -> Result<(), T> {
        if self.is_full() {
            return Err(value);
        }
        self.write_back(value);
        Ok(())
    }

    pub fn push_front(&mut self, value: T) -> Result<(), T> {
        if self.is_full() {
            return Err(value);
        }
        self.write_front(value);
        Ok(())
    }

    /// Construct a value at the back only if there is room; `f` is returned unused otherwise.
    pub fn emplace_back<F: FnOnce() -> T>(&mut self, f: F) -> Result<(), F> {
        if self.is_full() {
            return Err(f);
        }
        self.write_back(f());
        Ok(())
    }

    pub fn emplace_front<F: FnOnce() -> T>(&mut self, f: F) -> Result<(), F> {
        if self.is_full() {
            return Err(f);
        }
        self.write_front(f());
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        // SAFETY: head holds a live element that is now unlinked.
        let value = unsafe { ptr::read(self.slot(self.head)) };
        self.head = self.wrap_add(self.head, 1);
        self.len -= 1;
        Some(value)
    }

    pub fn pop_back(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        self.tail = self.wrap_sub_one(self.tail);
        self.len -= 1;
        // SAFETY: the slot before tail holds a live element that is now unlinked.
        Some(unsafe { ptr::read(self.slot(self.tail)) })
    }

    /// Element `index` positions from the front.
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        // SAFETY: logical positions below len map to live slots.
        Some(unsafe { &*self.slot(self.wrap_add(self.head, index)) })
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.len {
            return None;
        }
        // SAFETY: as in `get`, and `&mut self` makes the borrow unique.
        Some(unsafe { &mut *self.slot(self.wrap_add(self.head, index)) })
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

    /// Drop every element, front to back.
    pub fn clear(&mut self) {
        while let Some(value) = self.pop_front() {
            drop(value);
        }
        self.head = 0;
        self.tail = 0;
    }
}

impl<T, A: Allocator + ?Sized> Drop for RingBuffer<'_, T, A> {
    fn drop(&mut self) {
        if mem::needs_drop::<T>() {
            self.clear();
        }
    }
}

impl<T: fmt::Debug, A: Allocator + ?Sized> fmt::Debug for RingBuffer<'_, T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::TrackingAllocator;
    use std::rc::Rc;

    #[test]
    fn test_fill_then_reject() {
        let mut ring = RingBuffer::<u32>::new(3).unwrap();
        for i in 0..3 {
            ring.push_back(i).unwrap();
        }
        assert!(ring.is_full());
        assert_eq!(ring.push_back(99), Err(99));
        assert_eq!(ring.push_front(98), Err(98));

        for i in 0..3 {
            assert_eq!(ring.pop_front(), Some(i));
        }
        assert!(ring.is_empty());
        assert_eq!(ring.pop_front(), None);
        assert_eq!(ring.pop_back(), None);
    }

    #[test]
    fn test_wraps_around() {
        let mut ring = RingBuffer::<u32>::new(4).unwrap();
        for round in 0..10 {
            ring.push_back(round).unwrap();
            ring.push_back(round + 100).unwrap();
            assert_eq!(ring.pop_front(), Some(round));
            assert_eq!(ring.pop_front(), Some(round + 100));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_both_ends() {
        let mut ring = RingBuffer::<i32>::new(5).unwrap();
        ring.push_back(1).unwrap();
        ring.push_front(0).unwrap();
        ring.push_front(-1).unwrap();
        ring.push_back(2).unwrap();
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![-1, 0, 1, 2]);
        assert_eq!(ring.front(), Some(&-1));
        assert_eq!(ring.back(), Some(&2));
        assert_eq!(ring.pop_back(), Some(2));
        assert_eq!(ring.pop_front(), Some(-1));
        *ring.get_mut(1).unwrap() = 10;
        assert_eq!(ring.get(1), Some(&10));
        assert_eq!(ring.get(2), None);
    }

    #[test]
    fn test_emplace_returns_constructor_when_full() {
        let mut ring = RingBuffer::<String>::new(1).unwrap();
        assert!(ring.emplace_back(|| "a".to_string()).is_ok());
        let rejected = ring.emplace_front(|| "b".to_string()).unwrap_err();
        assert_eq!(rejected(), "b");
    }

    #[test]
    fn test_emplace_fills_both_ends_in_order() {
        let mut ring = RingBuffer::<u32>::new(3).unwrap();
        assert!(ring.emplace_back(|| 2).is_ok());
        assert!(ring.emplace_front(|| 1).is_ok());
        assert!(ring.emplace_back(|| 3).is_ok());
        assert!(ring.is_full());
        let mut called = false;
        assert!(ring.emplace_back(|| {
            called = true;
            4
        })
        .is_err());
        assert!(!called);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_drops_remaining_and_frees() {
        let tracker = TrackingAllocator::new(&HEAP);
        let marker = Rc::new(());
        {
            let mut ring = RingBuffer::new_in(4, &tracker).unwrap();
            for _ in 0..4 {
                ring.push_back(marker.clone()).unwrap();
            }
            ring.pop_front();
            assert_eq!(Rc::strong_count(&marker), 4);
        }
        assert_eq!(Rc::strong_count(&marker), 1);
        assert_eq!(tracker.live_bytes(), 0);
    }
}
