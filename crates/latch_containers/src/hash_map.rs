//! Open-addressing hash map with linear probing and tombstones.
//!
//! Keys, bucket words and values live in three parallel columns of one
//! [`MultiArrayBuffer`], so a probe sequence only walks the dense `Bucket`
//! column and touches a key only when the stored hash matches.

use crate::alloc::{Allocator, HeapAllocator, HEAP};
use crate::config::Settings;
use crate::error::ContainerError;
use crate::multi_array::MultiArrayBuffer;
use bytemuck::Zeroable;
use std::borrow::Borrow;
use std::collections::hash_map::DefaultHasher;
use std::hash::{BuildHasher, BuildHasherDefault, Hash};
use std::mem::{self, MaybeUninit};
use std::{fmt, marker::PhantomData};

/// Deterministic SipHash builder with fixed keys.
pub type DefaultHashBuilder = BuildHasherDefault<DefaultHasher>;

const STATE_SHIFT: u32 = 62;
const HASH_MASK: u64 = (1 << STATE_SHIFT) - 1;

const EMPTY: u64 = 0;
const FILLED: u64 = 1;
const REMOVED: u64 = 2;

/// Bucket word: state in the top two bits, truncated hash below.
///
/// All-zero is `Empty`, so a zero-filled column is an empty table.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Zeroable)]
struct Bucket(u64);

impl Bucket {
    const REMOVED: Bucket = Bucket(REMOVED << STATE_SHIFT);

    #[inline]
    fn filled(hash: u64) -> Self {
        Bucket((FILLED << STATE_SHIFT) | (hash & HASH_MASK))
    }

    #[inline]
    fn state(self) -> u64 {
        self.0 >> STATE_SHIFT
    }

    #[inline]
    fn hash(self) -> u64 {
        self.0 & HASH_MASK
    }

    #[inline]
    fn is_filled(self) -> bool {
        self.state() == FILLED
    }
}

type Slots<K, V> = (MaybeUninit<K>, Bucket, MaybeUninit<V>);

/// Hash map whose table never exceeds a 2/3 load factor.
///
/// Removal leaves a tombstone so later probes still reach displaced keys.
/// Tombstones count against the load factor and are purged by the next
/// rehash; when live entries alone are well under the limit that rehash keeps
/// the bucket count instead of growing.
///
/// Keys and values of any alignment are accepted. Over-aligned types round the
/// bucket count up to a multiple of their alignment.
pub struct HashMap<'a, K, V, A: Allocator + ?Sized = HeapAllocator, S = DefaultHashBuilder> {
    slots: MultiArrayBuffer<'a, Slots<K, V>, A>,
    len: usize,
    tombstones: usize,
    hasher: S,
    growth: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> HashMap<'static, K, V, HeapAllocator, DefaultHashBuilder> {
    /// Heap-backed map with at least `buckets` buckets.
    pub fn new(buckets: usize) -> Result<Self, ContainerError> {
        Self::new_in(buckets, &HEAP)
    }
}

impl<'a, K, V, A: Allocator + ?Sized> HashMap<'a, K, V, A, DefaultHashBuilder> {
    pub fn new_in(buckets: usize, alloc: &'a A) -> Result<Self, ContainerError> {
        Self::with_hasher_in(buckets, alloc, DefaultHashBuilder::default())
    }
}

impl<'a, K, V, A: Allocator + ?Sized, S> HashMap<'a, K, V, A, S> {
    pub fn with_hasher_in(buckets: usize, alloc: &'a A, hasher: S) -> Result<Self, ContainerError> {
        Self::build(buckets, alloc, hasher, Settings::default().growth.factor)
    }

    /// Map sized by `settings.hash_map.initial_buckets`.
    pub fn with_settings_in(alloc: &'a A, hasher: S, settings: &Settings) -> Result<Self, ContainerError> {
        Self::build(
            settings.hash_map.initial_buckets,
            alloc,
            hasher,
            settings.growth.factor,
        )
    }

    fn build(buckets: usize, alloc: &'a A, hasher: S, growth: usize) -> Result<Self, ContainerError> {
        Ok(Self {
            slots: Self::empty_table(buckets, alloc)?,
            len: 0,
            tombstones: 0,
            hasher,
            growth: growth.max(Settings::MIN_GROWTH_FACTOR),
            _marker: PhantomData,
        })
    }

    /// A table whose every bucket is `Empty`; its length is the bucket count.
    fn empty_table(buckets: usize, alloc: &'a A) -> Result<MultiArrayBuffer<'a, Slots<K, V>, A>, ContainerError> {
        let mut table = MultiArrayBuffer::new_in(buckets.max(1), alloc)?;
        table.resize(table.capacity())?;
        Ok(table)
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
    pub fn bucket_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn tombstone_count(&self) -> usize {
        self.tombstones
    }

    #[inline]
    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    #[inline]
    fn max_load(buckets: usize) -> usize {
        buckets * 2 / 3
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        let (keys, buckets, values) = self.slots.columns();
        buckets
            .iter()
            .zip(keys.iter().zip(values.iter()))
            .filter(|(bucket, _)| bucket.is_filled())
            // SAFETY: Filled buckets hold an initialized key and value.
            .map(|(_, (key, value))| unsafe { (key.assume_init_ref(), value.assume_init_ref()) })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> + '_ {
        let (keys, buckets, values) = self.slots.columns_mut();
        buckets
            .iter()
            .zip(keys.iter().zip(values.iter_mut()))
            .filter(|(bucket, _)| bucket.is_filled())
            // SAFETY: as in `iter`; the value column is uniquely borrowed.
            .map(|(_, (key, value))| unsafe { (key.assume_init_ref(), value.assume_init_mut()) })
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, value)| value)
    }

    /// Drop every entry and reset all buckets to `Empty`. Keeps the bucket count.
    pub fn clear(&mut self) {
        self.drop_entries();
        self.slots.fill_zeroed();
        self.len = 0;
        self.tombstones = 0;
    }

    fn drop_entries(&mut self) {
        if self.len == 0 || !(mem::needs_drop::<K>() || mem::needs_drop::<V>()) {
            return;
        }
        let (keys, buckets, values) = self.slots.columns_mut();
        for ((key, bucket), value) in keys.iter_mut().zip(buckets.iter()).zip(values.iter_mut()) {
            if bucket.is_filled() {
                unsafe {
                    // SAFETY: Filled buckets own their key and value; the caller resets the states.
                    key.assume_init_drop();
                    value.assume_init_drop();
                }
            }
        }
    }
}

impl<'a, K: Hash + Eq, V, A: Allocator + ?Sized, S: BuildHasher> HashMap<'a, K, V, A, S> {
    #[inline]
    fn hash_of<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        self.hasher.hash_one(key) & HASH_MASK
    }

    #[inline]
    fn home(hash: u64, buckets: usize) -> usize {
        (hash % buckets as u64) as usize
    }

    /// Bucket index holding `key`, if any.
    #[inline]
    fn find_index<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_hashed(self.hash_of(key), key)
    }

    /// As [`HashMap::find_index`], with `hash` already computed for `key`.
    fn find_hashed<Q>(&self, hash: u64, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (keys, buckets, _) = self.slots.columns();
        let count = buckets.len();
        let mut index = Self::home(hash, count);
        for _ in 0..count {
            let bucket = buckets[index];
            match bucket.state() {
                EMPTY => return None,
                // SAFETY: Filled buckets hold an initialized key.
                FILLED if bucket.hash() == hash && unsafe { keys[index].assume_init_ref() }.borrow() == key => {
                    return Some(index);
                }
                _ => {}
            }
            index += 1;
            if index == count {
                index = 0;
            }
        }
        None
    }

    /// Store into the first non-Filled bucket on `hash`'s probe path.
    ///
    /// The caller guarantees such a bucket exists and the key is absent.
    fn place(&mut self, hash: u64, key: K, value: V) -> usize {
        let (keys, buckets, values) = self.slots.columns_mut();
        let count = buckets.len();
        let mut index = Self::home(hash, count);
        while buckets[index].is_filled() {
            index += 1;
            if index == count {
                index = 0;
            }
        }
        if buckets[index] == Bucket::REMOVED {
            self.tombstones -= 1;
        }
        keys[index].write(key);
        values[index].write(value);
        buckets[index] = Bucket::filled(hash);
        self.len += 1;
        index
    }

    /// Make room for one more entry, rehashing if the load factor would be exceeded.
    fn reserve_for_insert(&mut self) -> Result<(), ContainerError> {
        let buckets = self.bucket_count();
        let max_load = Self::max_load(buckets);
        if self.len + self.tombstones < max_load {
            return Ok(());
        }
        let needed = self.len + 1;
        let target = if needed <= max_load / 2 {
            buckets
        } else {
            let overflow = || ContainerError::CapacityOverflow {
                requested: needed,
                elem_size: mem::size_of::<Slots<K, V>>(),
            };
            let by_growth = buckets.checked_mul(self.growth).ok_or_else(overflow)?;
            let by_count = needed.checked_mul(3).ok_or_else(overflow)?.div_ceil(2);
            by_growth.max(by_count)
        };
        self.rehash(target)
    }

    /// Move every entry into a fresh table of at least `buckets` buckets.
    fn rehash(&mut self, buckets: usize) -> Result<(), ContainerError> {
        let mut table = Self::empty_table(buckets, self.slots.allocator())?;
        let from = self.bucket_count();
        let to = table.len();
        {
            let (old_keys, old_buckets, old_values) = self.slots.columns();
            let (keys, new_buckets, values) = table.columns_mut();
            for (index, bucket) in old_buckets.iter().enumerate() {
                if !bucket.is_filled() {
                    continue;
                }
                let mut slot = Self::home(bucket.hash(), to);
                while new_buckets[slot].is_filled() {
                    slot += 1;
                    if slot == to {
                        slot = 0;
                    }
                }
                unsafe {
                    // SAFETY: ownership moves bitwise; the old table is freed without drops.
                    keys[slot].write(old_keys[index].assume_init_read());
                    values[slot].write(old_values[index].assume_init_read());
                }
                new_buckets[slot] = *bucket;
            }
        }
        self.slots.swap(&mut table);
        tracing::debug!(
            from,
            to,
            len = self.len,
            tombstones = self.tombstones,
            "hash map rehashed"
        );
        self.tombstones = 0;
        Ok(())
    }

    /// Insert or replace. Returns the previous value for `key`, if any.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>, ContainerError> {
        let hash = self.hash_of(&key);
        if let Some(index) = self.find_hashed(hash, &key) {
            let (_, _, values) = self.slots.columns_mut();
            // SAFETY: `find_hashed` only yields Filled buckets.
            let stored = unsafe { values[index].assume_init_mut() };
            return Ok(Some(mem::replace(stored, value)));
        }
        self.reserve_for_insert()?;
        self.place(hash, key, value);
        Ok(None)
    }

    /// Value for `key`, inserting `f()` first if absent.
    pub fn get_or_insert_with<F: FnOnce() -> V>(&mut self, key: K, f: F) -> Result<&mut V, ContainerError> {
        let hash = self.hash_of(&key);
        let index = match self.find_hashed(hash, &key) {
            Some(index) => index,
            None => {
                self.reserve_for_insert()?;
                self.place(hash, key, f())
            }
        };
        let (_, _, values) = self.slots.columns_mut();
        // SAFETY: the bucket is Filled either way.
        Ok(unsafe { values[index].assume_init_mut() })
    }

    pub fn find<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.find_index(key)?;
        let (_, _, values) = self.slots.columns();
        // SAFETY: `find_index` only yields Filled buckets.
        Some(unsafe { values[index].assume_init_ref() })
    }

    pub fn find_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.find_index(key)?;
        let (_, _, values) = self.slots.columns_mut();
        // SAFETY: as in `find`.
        Some(unsafe { values[index].assume_init_mut() })
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_index(key).is_some()
    }

    /// Remove `key`, leaving a tombstone. Absent keys are a no-op.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.find_index(key)?;
        let (keys, buckets, values) = self.slots.columns_mut();
        buckets[index] = Bucket::REMOVED;
        // SAFETY: the bucket was Filled and is now Removed, so the pair moves out exactly once.
        let entry = unsafe { (keys[index].assume_init_read(), values[index].assume_init_read()) };
        self.len -= 1;
        self.tombstones += 1;
        Some(entry)
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_entry(key).map(|(_, value)| value)
    }
}

impl<K, V, A: Allocator + ?Sized, S> Drop for HashMap<'_, K, V, A, S> {
    fn drop(&mut self) {
        self.drop_entries();
    }
}

impl<K: fmt::Debug, V: fmt::Debug, A: Allocator + ?Sized, S> fmt::Debug for HashMap<'_, K, V, A, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
