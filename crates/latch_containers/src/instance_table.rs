//! Dense per-owner rows with key lookup, the backing store of a component manager.
//!
//! Rows stay packed in a [`MultiArrayBuffer`]; destroying an owner swap-removes
//! its row and retargets the handle of the row that moved into the hole.

use crate::alloc::{Allocator, HeapAllocator, HEAP};
use crate::array::Array;
use crate::error::ContainerError;
use crate::hash_map::HashMap;
use crate::multi_array::{ColumnAt, Columns, MultiArrayBuffer};
use std::hash::Hash;

/// Row handle. Valid until the next [`InstanceTable::destroy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instance(u32);

impl Instance {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub struct InstanceTable<'a, K, C: Columns, A: Allocator + ?Sized = HeapAllocator> {
    instances: HashMap<'a, K, Instance, A>,
    owners: Array<'a, K, A>,
    data: MultiArrayBuffer<'a, C, A>,
}

impl<K: Hash + Eq + Copy, C: Columns> InstanceTable<'static, K, C, HeapAllocator> {
    pub fn new(capacity: usize) -> Result<Self, ContainerError> {
        Self::new_in(capacity, &HEAP)
    }
}

impl<'a, K: Hash + Eq + Copy, C: Columns, A: Allocator + ?Sized> InstanceTable<'a, K, C, A> {
    pub fn new_in(capacity: usize, alloc: &'a A) -> Result<Self, ContainerError> {
        let capacity = capacity.max(1);
        Ok(Self {
            instances: HashMap::new_in(capacity, alloc)?,
            owners: Array::new_in(capacity, alloc)?,
            data: MultiArrayBuffer::new_in(capacity, alloc)?,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Give `key` a row, or overwrite its existing row.
    ///
    /// On failure the table is left as it was.
    pub fn create(&mut self, key: K, row: C) -> Result<Instance, ContainerError> {
        if let Some(instance) = self.lookup(&key) {
            self.data.set_row(instance.index(), row);
            return Ok(instance);
        }

        let index = self.data.len();
        let instance = u32::try_from(index)
            .map(Instance)
            .map_err(|_| ContainerError::CapacityOverflow {
                requested: index,
                elem_size: C::ROW_BYTES,
            })?;

        self.data.push(row)?;
        if let Err(err) = self.owners.push(key) {
            self.data.swap_remove(index);
            return Err(err);
        }
        if let Err(err) = self.instances.insert(key, instance) {
            self.owners.pop();
            self.data.swap_remove(index);
            return Err(err);
        }
        Ok(instance)
    }

    pub fn lookup(&self, key: &K) -> Option<Instance> {
        self.instances.find(key).copied()
    }

    /// Remove `key`'s row, returning it. The last row moves into its place.
    pub fn destroy(&mut self, key: &K) -> Option<C> {
        let instance = self.instances.remove(key)?;
        let index = instance.index();
        let removed = self.data.swap_remove(index);
        self.owners.swap_remove(index);

        if let Some(&moved) = self.owners.get(index) {
            if let Some(handle) = self.instances.find_mut(&moved) {
                *handle = instance;
            }
        }
        Some(removed)
    }

    /// Owner of `instance`. Panics on a stale handle past the end.
    pub fn owner(&self, instance: Instance) -> K {
        self.owners[instance.index()]
    }

    pub fn owners(&self) -> &[K] {
        &self.owners
    }

    pub fn row(&self, instance: Instance) -> C
    where
        C: Copy,
    {
        self.data.row(instance.index())
    }

    pub fn set_row(&mut self, instance: Instance, row: C) {
        self.data.set_row(instance.index(), row);
    }

    pub fn column<const I: usize>(&self) -> &[<C as ColumnAt<I>>::Elem]
    where
        C: ColumnAt<I>,
    {
        self.data.column::<I>()
    }

    pub fn column_mut<const I: usize>(&mut self) -> &mut [<C as ColumnAt<I>>::Elem]
    where
        C: ColumnAt<I>,
    {
        self.data.column_mut::<I>()
    }

    pub fn columns_mut(&mut self) -> C::SlicesMut<'_> {
        self.data.columns_mut()
    }
}
