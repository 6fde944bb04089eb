//! Struct-of-arrays buffer: N parallel columns in one allocation.
//!
//! A buffer of `(A, B, C)` rows with capacity `cap` is laid out as
//!
//! ```text
//! [ A; cap ][ B; cap ][ C; cap ]
//! ^ base    ^ base + cap*size(A)
//!                     ^ base + cap*(size(A)+size(B))
//! ```
//!
//! Capacity is always a multiple of [`CAPACITY_ALIGNMENT`] and of the widest
//! column alignment, so every column offset is aligned for every column and
//! no padding is needed between columns. Any capacity change relays out every
//! column; column slices borrow the buffer, so none can survive it.
//!
//! Column types must be [`Zeroable`] and free of drop glue: fresh rows are
//! zero bytes, and no destructors ever run.

use crate::alloc::{Allocator, HeapAllocator, RawBlock, HEAP};
use crate::config::Settings;
use crate::error::ContainerError;
use bytemuck::Zeroable;
use std::{alloc::Layout, marker::PhantomData, mem, ptr, slice};

/// Capacity granularity of every [`MultiArrayBuffer`].
pub const CAPACITY_ALIGNMENT: usize = 32;

#[inline]
pub fn align_capacity(n: usize) -> Option<usize> {
    n.checked_add(CAPACITY_ALIGNMENT - 1)
        .map(|n| n & !(CAPACITY_ALIGNMENT - 1))
}

/// A tuple of column element types.
///
/// # Safety
/// `column_size`/`column_align` must describe the tuple's element types in
/// order, and the raw accessors must only touch the column they name.
pub unsafe trait Columns: Sized {
    const COUNT: usize;
    /// Sum of all column element sizes: the bytes one row occupies.
    const ROW_BYTES: usize;
    const MAX_ALIGN: usize;

    type Slices<'s>
    where
        Self: 's;
    type SlicesMut<'s>
    where
        Self: 's;

    fn column_size(index: usize) -> usize;

    fn column_needs_drop() -> bool;

    /// # Safety
    /// `base` must point to a live block laid out for `capacity` rows with
    /// `len <= capacity` initialized rows, borrowed for `'s`.
    unsafe fn slices<'s>(base: *mut u8, capacity: usize, len: usize) -> Self::Slices<'s>
    where
        Self: 's;

    /// # Safety
    /// As for [`Columns::slices`], with a unique borrow.
    unsafe fn slices_mut<'s>(base: *mut u8, capacity: usize, len: usize) -> Self::SlicesMut<'s>
    where
        Self: 's;

    /// # Safety
    /// `row < capacity`; overwritten values are not dropped.
    unsafe fn write_row(base: *mut u8, capacity: usize, row: usize, value: Self);

    /// # Safety
    /// `row < capacity`; yields a bitwise copy.
    unsafe fn read_row(base: *mut u8, capacity: usize, row: usize) -> Self;
}

/// Column `I` of a [`Columns`] tuple.
pub trait ColumnAt<const I: usize>: Columns {
    type Elem: Zeroable;
}

/// Byte offset of column `index` in a block laid out for `capacity` rows.
#[inline]
pub fn column_offset<C: Columns>(capacity: usize, index: usize) -> usize {
    let preceding: usize = (0..index).map(C::column_size).sum();
    capacity * preceding
}

macro_rules! impl_column_at {
    (($($All:ident),+) $idx:tt $T:ident) => {
        impl<$($All: Zeroable),+> ColumnAt<$idx> for ($($All,)+) {
            type Elem = $T;
        }
    };
}

macro_rules! impl_columns {
    ($tuple:tt; $count:expr; $($idx:tt $T:ident),+) => {
        unsafe impl<$($T: Zeroable),+> Columns for ($($T,)+) {
            const COUNT: usize = $count;
            const ROW_BYTES: usize = 0 $(+ mem::size_of::<$T>())+;
            const MAX_ALIGN: usize = {
                let mut align = 1;
                $(
                    if mem::align_of::<$T>() > align {
                        align = mem::align_of::<$T>();
                    }
                )+
                align
            };

            type Slices<'s> = ($(&'s [$T],)+) where Self: 's;
            type SlicesMut<'s> = ($(&'s mut [$T],)+) where Self: 's;

            #[inline]
            fn column_size(index: usize) -> usize {
                match index {
                    $($idx => mem::size_of::<$T>(),)+
                    _ => 0,
                }
            }

            #[inline]
            fn column_needs_drop() -> bool {
                false $(|| mem::needs_drop::<$T>())+
            }

            #[inline]
            unsafe fn slices<'s>(base: *mut u8, capacity: usize, len: usize) -> Self::Slices<'s>
            where
                Self: 's,
            {
                ($(
                    slice::from_raw_parts(
                        base.add(column_offset::<Self>(capacity, $idx)).cast::<$T>(),
                        len,
                    ),
                )+)
            }

            #[inline]
            unsafe fn slices_mut<'s>(base: *mut u8, capacity: usize, len: usize) -> Self::SlicesMut<'s>
            where
                Self: 's,
            {
                ($(
                    slice::from_raw_parts_mut(
                        base.add(column_offset::<Self>(capacity, $idx)).cast::<$T>(),
                        len,
                    ),
                )+)
            }

            #[inline]
            unsafe fn write_row(base: *mut u8, capacity: usize, row: usize, value: Self) {
                $(
                    ptr::write(
                        base.add(column_offset::<Self>(capacity, $idx)).cast::<$T>().add(row),
                        value.$idx,
                    );
                )+
            }

            #[inline]
            unsafe fn read_row(base: *mut u8, capacity: usize, row: usize) -> Self {
                ($(
                    ptr::read(base.add(column_offset::<Self>(capacity, $idx)).cast::<$T>().add(row)),
                )+)
            }
        }

        $( impl_column_at!($tuple $idx $T); )+
    };
}

impl_columns!((A); 1; 0 A);
impl_columns!((A, B); 2; 0 A, 1 B);
impl_columns!((A, B, C); 3; 0 A, 1 B, 2 C);
impl_columns!((A, B, C, D); 4; 0 A, 1 B, 2 C, 3 D);
impl_columns!((A, B, C, D, E); 5; 0 A, 1 B, 2 C, 3 D, 4 E);
impl_columns!((A, B, C, D, E, F); 6; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F);
impl_columns!((A, B, C, D, E, F, G); 7; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G);
impl_columns!((A, B, C, D, E, F, G, H); 8; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H);

/// Parallel column storage sharing one capacity, one length and one block.
pub struct MultiArrayBuffer<'a, C: Columns, A: Allocator + ?Sized = HeapAllocator> {
    block: RawBlock<'a, A>,
    capacity: usize,
    len: usize,
    /// Every row at or past `len` is known to be zero bytes.
    tail_zeroed: bool,
    growth: usize,
    _marker: PhantomData<C>,
}

impl<C: Columns> MultiArrayBuffer<'static, C, HeapAllocator> {
    pub fn new(capacity: usize) -> Result<Self, ContainerError> {
        Self::new_in(capacity, &HEAP)
    }
}

impl<'a, C: Columns, A: Allocator + ?Sized> MultiArrayBuffer<'a, C, A> {
    pub const CAPACITY_ALIGNMENT: usize = CAPACITY_ALIGNMENT;

    /// Create an empty buffer with room for at least `capacity` rows.
    ///
    /// Panics if a column type needs drop or every column is zero-sized.
    pub fn new_in(capacity: usize, alloc: &'a A) -> Result<Self, ContainerError> {
        Self::with_settings_in(capacity, alloc, &Settings::default())
    }

    pub fn with_settings_in(
        capacity: usize,
        alloc: &'a A,
        settings: &Settings,
    ) -> Result<Self, ContainerError> {
        assert!(!C::column_needs_drop(), "MultiArrayBuffer columns must not need drop");
        assert!(C::ROW_BYTES != 0, "MultiArrayBuffer rows must not be zero-sized");
        let capacity = Self::rounded(capacity.max(1))?;
        let block = RawBlock::allocate(alloc, Self::layout(capacity)?)?;
        Ok(Self {
            tail_zeroed: block.zeroed(),
            block,
            capacity,
            len: 0,
            growth: settings.growth.factor.max(Settings::MIN_GROWTH_FACTOR),
            _marker: PhantomData,
        })
    }

    fn overflow(requested: usize) -> ContainerError {
        ContainerError::CapacityOverflow { requested, elem_size: C::ROW_BYTES }
    }

    /// Row granularity: both values are powers of two, so the larger is a multiple of the smaller.
    #[inline]
    fn granularity() -> usize {
        CAPACITY_ALIGNMENT.max(C::MAX_ALIGN)
    }

    fn rounded(capacity: usize) -> Result<usize, ContainerError> {
        let granularity = Self::granularity();
        capacity
            .checked_add(granularity - 1)
            .map(|n| n & !(granularity - 1))
            .ok_or_else(|| Self::overflow(capacity))
    }

    fn layout(capacity: usize) -> Result<Layout, ContainerError> {
        let size = capacity
            .checked_mul(C::ROW_BYTES)
            .ok_or_else(|| Self::overflow(capacity))?;
        Layout::from_size_align(size, C::MAX_ALIGN).map_err(|_| Self::overflow(capacity))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Always a multiple of [`CAPACITY_ALIGNMENT`].
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn allocator(&self) -> &'a A {
        self.block.allocator()
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        self.block.ptr()
    }

    /// Ensure room for `capacity` rows (rounded up to the alignment boundary).
    ///
    /// Returns `true` when the block was replaced, which moves every column.
    pub fn reserve(&mut self, capacity: usize) -> Result<bool, ContainerError> {
        let capacity = Self::rounded(capacity)?;
        if capacity <= self.capacity {
            return Ok(false);
        }
        let block = RawBlock::allocate(self.allocator(), Self::layout(capacity)?)?;
        for index in 0..C::COUNT {
            let size = C::column_size(index);
            unsafe {
                // SAFETY: both blocks hold `len` rows of this column at their own stride.
                ptr::copy_nonoverlapping(
                    self.base().add(column_offset::<C>(self.capacity, index)),
                    block.ptr().add(column_offset::<C>(capacity, index)),
                    self.len * size,
                );
            }
        }
        tracing::debug!(
            from = self.capacity,
            to = capacity,
            rows = self.len,
            columns = C::COUNT,
            row_bytes = C::ROW_BYTES,
            "multi-array relocated"
        );
        self.tail_zeroed = block.zeroed();
        self.block = block;
        self.capacity = capacity;
        Ok(true)
    }

    /// Zero rows `start..end` in every column.
    fn zero_rows(&mut self, start: usize, end: usize) {
        debug_assert!(start <= end && end <= self.capacity);
        for index in 0..C::COUNT {
            let size = C::column_size(index);
            unsafe {
                // SAFETY: the range lies within the column; all-zero is valid for every column type.
                ptr::write_bytes(
                    self.base().add(column_offset::<C>(self.capacity, index) + start * size),
                    0,
                    (end - start) * size,
                );
            }
        }
    }

    /// Set the row count. New rows are zero; freed rows are zero-filled.
    ///
    /// Returns `true` when growth relocated the columns.
    pub fn resize(&mut self, len: usize) -> Result<bool, ContainerError> {
        let relocated = self.reserve(len)?;
        if len > self.len {
            if !self.tail_zeroed {
                self.zero_rows(self.len, len);
            }
        } else {
            self.zero_rows(len, self.len);
        }
        self.len = len;
        Ok(relocated)
    }

    /// Append one zeroed row, growing by the growth factor when full.
    ///
    /// Returns the new row's index.
    pub fn extend(&mut self) -> Result<usize, ContainerError> {
        if self.len == self.capacity {
            let target = self
                .capacity
                .checked_mul(self.growth)
                .ok_or_else(|| Self::overflow(self.capacity))?;
            self.reserve(target)?;
        }
        let row = self.len;
        if !self.tail_zeroed {
            self.zero_rows(row, row + 1);
        }
        self.len += 1;
        Ok(row)
    }

    /// Append a row, returning its index.
    pub fn push(&mut self, value: C) -> Result<usize, ContainerError> {
        let row = self.extend()?;
        unsafe {
            // SAFETY: `row < len <= capacity`; the zeroed row has no drop glue.
            C::write_row(self.base(), self.capacity, row, value);
        }
        Ok(row)
    }

    /// Read a copy of `row`. Panics if out of bounds.
    pub fn row(&self, row: usize) -> C
    where
        C: Copy,
    {
        assert!(row < self.len, "row {row} out of bounds (len {})", self.len);
        // SAFETY: bounds checked; `C: Copy`.
        unsafe { C::read_row(self.base(), self.capacity, row) }
    }

    /// Overwrite `row`. Panics if out of bounds.
    pub fn set_row(&mut self, row: usize, value: C) {
        assert!(row < self.len, "row {row} out of bounds (len {})", self.len);
        unsafe {
            // SAFETY: bounds checked; columns have no drop glue to skip.
            C::write_row(self.base(), self.capacity, row, value);
        }
    }

    /// Remove `row` by moving the last row into it; returns the removed row.
    ///
    /// The row that used to be last now lives at `row`.
    pub fn swap_remove(&mut self, row: usize) -> C {
        assert!(row < self.len, "row {row} out of bounds (len {})", self.len);
        let last = self.len - 1;
        let base = self.base();
        let removed = unsafe {
            // SAFETY: both rows are in bounds; the removed copy is handed to the caller.
            let removed = C::read_row(base, self.capacity, row);
            if row != last {
                for index in 0..C::COUNT {
                    let size = C::column_size(index);
                    let column = base.add(column_offset::<C>(self.capacity, index));
                    ptr::copy_nonoverlapping(column.add(last * size), column.add(row * size), size);
                }
            }
            removed
        };
        self.zero_rows(last, last + 1);
        self.len = last;
        removed
    }

    /// Zero every live row without changing the length.
    pub fn fill_zeroed(&mut self) {
        self.zero_rows(0, self.len);
    }

    /// Drop to zero rows, zero-filling the freed region.
    pub fn clear(&mut self) {
        self.zero_rows(0, self.len);
        self.len = 0;
    }

    /// Column `I` as a slice of `len` elements.
    #[inline]
    pub fn column<const I: usize>(&self) -> &[<C as ColumnAt<I>>::Elem]
    where
        C: ColumnAt<I>,
    {
        // SAFETY: rows 0..len of every column are initialized (zero or written).
        unsafe { slice::from_raw_parts(self.column_ptr::<I>(), self.len) }
    }

    #[inline]
    pub fn column_mut<const I: usize>(&mut self) -> &mut [<C as ColumnAt<I>>::Elem]
    where
        C: ColumnAt<I>,
    {
        // SAFETY: as in `column`, with a unique borrow.
        unsafe { slice::from_raw_parts_mut(self.column_ptr::<I>(), self.len) }
    }

    /// Raw base address of column `I`.
    ///
    /// Invalidated by any call that returns `true` for relocation
    /// ([`MultiArrayBuffer::reserve`], [`MultiArrayBuffer::resize`]) and by
    /// any growing [`MultiArrayBuffer::extend`]/[`MultiArrayBuffer::push`].
    #[inline]
    pub fn column_ptr<const I: usize>(&self) -> *mut <C as ColumnAt<I>>::Elem
    where
        C: ColumnAt<I>,
    {
        // SAFETY: the offset lies within the block.
        unsafe { self.base().add(column_offset::<C>(self.capacity, I)).cast() }
    }

    /// Every column at once, read-only.
    #[inline]
    pub fn columns(&self) -> C::Slices<'_> {
        // SAFETY: the block is borrowed for the returned lifetime.
        unsafe { C::slices(self.base(), self.capacity, self.len) }
    }

    /// Every column at once, mutably. The columns are disjoint.
    #[inline]
    pub fn columns_mut(&mut self) -> C::SlicesMut<'_> {
        // SAFETY: the block is uniquely borrowed; columns never overlap.
        unsafe { C::slices_mut(self.base(), self.capacity, self.len) }
    }

    /// Exchange the entire state with `other` in O(1).
    #[inline]
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{StackAllocator, StackBuffer, TrackingAllocator};

    #[test]
    fn test_capacity_rounds_to_boundary() {
        let buf = MultiArrayBuffer::<(u32, f32)>::new(1).unwrap();
        assert_eq!(buf.capacity(), 32);
        let buf = MultiArrayBuffer::<(u32, f32)>::new(33).unwrap();
        assert_eq!(buf.capacity(), 64);
        assert_eq!(align_capacity(64), Some(64));
        assert_eq!(align_capacity(usize::MAX), None);
    }

    #[test]
    fn test_column_layout() {
        let mut buf = MultiArrayBuffer::<(u8, u64, u16)>::new(32).unwrap();
        let base = buf.column_ptr::<0>() as usize;
        assert_eq!(buf.column_ptr::<1>() as usize - base, 32);
        assert_eq!(buf.column_ptr::<2>() as usize - base, 32 * 9);
        assert_eq!(<(u8, u64, u16) as Columns>::ROW_BYTES, 11);
        assert_eq!(<(u8, u64, u16) as Columns>::MAX_ALIGN, 8);
        buf.push((1, 2, 3)).unwrap();
        assert_eq!(buf.row(0), (1, 2, 3));
    }

    #[test]
    fn test_reserve_preserves_row_pairing() {
        let mut buf = MultiArrayBuffer::<(u32, u64)>::new(32).unwrap();
        for i in 0..32 {
            buf.push((i, u64::from(i) * 1000)).unwrap();
        }
        assert!(buf.reserve(100).unwrap());
        assert_eq!(buf.capacity(), 128);
        assert!(!buf.reserve(128).unwrap());
        let (ids, values) = buf.columns();
        for (id, value) in ids.iter().zip(values.iter()) {
            assert_eq!(*value, u64::from(*id) * 1000);
        }
    }

    #[test]
    fn test_resize_zero_fills_both_ways() {
        let mut buf = MultiArrayBuffer::<(u32, u16)>::new(32).unwrap();
        buf.resize(10).unwrap();
        buf.column_mut::<0>().fill(7);
        buf.column_mut::<1>().fill(9);
        buf.resize(4).unwrap();
        buf.resize(10).unwrap();
        assert_eq!(&buf.column::<0>()[..4], &[7; 4]);
        assert!(buf.column::<0>()[4..].iter().all(|&v| v == 0));
        assert!(buf.column::<1>()[4..].iter().all(|&v| v == 0));
    }

    #[test]
    fn test_resize_on_stack_allocator_zeroes_rows() {
        let mut scratch = StackBuffer::<4096>::new();
        let stack = StackAllocator::new(&mut scratch);
        let mut buf = MultiArrayBuffer::<(u32, u32), _>::new_in(32, &stack).unwrap();
        assert!(buf.resize(40).unwrap());
        let (a, b) = buf.columns();
        assert!(a.iter().chain(b.iter()).all(|&v| v == 0));
    }

    #[test]
    fn test_extend_grows_by_factor() {
        let tracker = TrackingAllocator::new(&HEAP);
        let mut buf = MultiArrayBuffer::<(u16,), _>::new_in(32, &tracker).unwrap();
        for i in 0..33 {
            assert_eq!(buf.extend().unwrap(), i);
        }
        assert_eq!(buf.capacity(), 64);
        assert_eq!(tracker.alloc_count(), 2);
        drop(buf);
        assert_eq!(tracker.live_bytes(), 0);
    }

    #[test]
    fn test_swap_remove_moves_last_row() {
        let mut buf = MultiArrayBuffer::<(u32, u8)>::new(32).unwrap();
        for i in 0..4 {
            buf.push((i, i as u8)).unwrap();
        }
        assert_eq!(buf.swap_remove(1), (1, 1));
        assert_eq!(buf.column::<0>(), &[0, 3, 2]);
        assert_eq!(buf.column::<1>(), &[0, 3, 2]);
        assert_eq!(buf.swap_remove(2), (2, 2));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_columns_mut_are_disjoint() {
        let mut buf = MultiArrayBuffer::<(f32, f32, u32)>::new(64).unwrap();
        buf.resize(5).unwrap();
        let (pos, vel, ticks) = buf.columns_mut();
        for i in 0..5 {
            vel[i] = 2.0;
            pos[i] += vel[i];
            ticks[i] += 1;
        }
        assert_eq!(buf.column::<0>(), &[2.0; 5]);
        assert_eq!(buf.column::<2>(), &[1; 5]);
    }

    #[test]
    fn test_swap_exchanges_state() {
        let mut a = MultiArrayBuffer::<(u64,)>::new(32).unwrap();
        let mut b = MultiArrayBuffer::<(u64,)>::new(96).unwrap();
        a.push((1,)).unwrap();
        a.swap(&mut b);
        assert_eq!(a.capacity(), 96);
        assert!(a.is_empty());
        assert_eq!(b.column::<0>(), &[1]);
    }

    struct Noisy;

    impl Drop for Noisy {
        fn drop(&mut self) {}
    }

    unsafe impl Zeroable for Noisy {}

    #[test]
    #[should_panic(expected = "must not need drop")]
    fn test_rejects_drop_columns() {
        let _ = MultiArrayBuffer::<(u8, Noisy)>::new(1);
    }

    #[derive(Clone, Copy, Zeroable)]
    #[repr(C, align(64))]
    struct Wide(u64);

    #[test]
    fn test_wide_alignment_rounds_capacity() {
        let mut buf = MultiArrayBuffer::<(u8, Wide)>::new(1).unwrap();
        assert_eq!(buf.capacity(), 64);
        assert_eq!(buf.column_ptr::<1>() as usize % 64, 0);
        buf.reserve(65).unwrap();
        assert_eq!(buf.capacity(), 128);
        assert_eq!(buf.column_ptr::<1>() as usize % 64, 0);
        buf.push((3, Wide(9))).unwrap();
        assert_eq!(buf.row(0).1 .0, 9);
    }

    #[test]
    fn test_maybe_uninit_columns() {
        let mut buf = MultiArrayBuffer::<(std::mem::MaybeUninit<String>, u32)>::new(4).unwrap();
        buf.resize(2).unwrap();
        buf.column_mut::<0>()[1].write("kept".to_string());
        // SAFETY: row 1 was written above and is read exactly once.
        let value = unsafe { buf.column::<0>()[1].assume_init_read() };
        assert_eq!(value, "kept");
        assert_eq!(buf.column::<1>(), &[0, 0]);
    }
}
