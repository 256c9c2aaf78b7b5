//! Bounded and self-shrinking collections.
//!
//! `BoundedVec` backs the fixed-capacity lists that travel on the wire
//! (packet path, PDSF history). Pushes past capacity fail instead of growing.
//!
//! `ShrinkingHashMap` backs the long-lived caches (seen messages, election
//! neighbors). Those tables grow during dense bursts and then drain, so the map
//! tracks removals since the last insert. After 1/16 of max capacity
//! consecutive removals the backing storage is shrunk.

use alloc::vec::Vec;
use core::ops::Deref;

use hashbrown::HashMap;

use crate::types::Error;

/// Vector with a hard capacity of `N` elements.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundedVec<T, const N: usize> {
    items: Vec<T>,
}

impl<T, const N: usize> BoundedVec<T, N> {
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Append, failing with `CapacityExceeded` when full.
    pub fn try_push(&mut self, value: T) -> Result<(), Error> {
        if self.items.len() >= N {
            return Err(Error::CapacityExceeded);
        }
        self.items.push(value);
        Ok(())
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= N
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

impl<T: Clone, const N: usize> BoundedVec<T, N> {
    /// Build from a slice, failing if it is longer than `N`.
    pub fn from_slice(items: &[T]) -> Result<Self, Error> {
        if items.len() > N {
            return Err(Error::CapacityExceeded);
        }
        Ok(Self {
            items: items.to_vec(),
        })
    }
}

impl<T, const N: usize> Deref for BoundedVec<T, N> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

/// Calculate shrink threshold from max capacity (1/16, minimum 1).
const fn shrink_threshold(max_capacity: usize) -> u8 {
    let threshold = max_capacity / 16;
    if threshold == 0 {
        1
    } else if threshold > u8::MAX as usize {
        u8::MAX
    } else {
        threshold as u8
    }
}

/// A HashMap that shrinks after consecutive removals without insertions.
///
/// The map does not enforce `max_capacity` itself; callers check `len()`
/// before inserting.
pub struct ShrinkingHashMap<K, V> {
    inner: HashMap<K, V>,
    removals_since_add: u8,
    shrink_threshold: u8,
    max_capacity: usize,
}

impl<K, V> ShrinkingHashMap<K, V>
where
    K: Eq + core::hash::Hash,
{
    pub fn with_max_capacity(max_capacity: usize) -> Self {
        Self {
            inner: HashMap::new(),
            removals_since_add: 0,
            shrink_threshold: shrink_threshold(max_capacity),
            max_capacity,
        }
    }

    /// Insert a key-value pair. Resets removal counter.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.removals_since_add = 0;
        self.inner.insert(key, value)
    }

    fn maybe_shrink(&mut self) {
        if self.removals_since_add >= self.shrink_threshold {
            self.inner.shrink_to_fit();
            self.removals_since_add = 0;
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// True once `len()` reaches the configured maximum.
    pub fn is_full(&self) -> bool {
        self.inner.len() >= self.max_capacity
    }

    pub fn values(&self) -> hashbrown::hash_map::Values<'_, K, V> {
        self.inner.values()
    }

    /// Drop everything and release the storage.
    pub fn clear(&mut self) {
        self.inner.clear();
        self.inner.shrink_to_fit();
        self.removals_since_add = 0;
    }

    /// Retain entries matching predicate, returning how many were removed.
    pub fn retain<F>(&mut self, mut f: F) -> usize
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        let before = self.inner.len();
        self.inner.retain(|k, v| f(k, v));
        let removed = before - self.inner.len();
        if removed > 0 {
            // Saturate both the cast and addition to handle >255 removals
            let removed_u8 = removed.min(u8::MAX as usize) as u8;
            self.removals_since_add = self.removals_since_add.saturating_add(removed_u8);
            self.maybe_shrink();
        }
        removed
    }
}
