// Handle registry
//
// Handle -> object table for one resource family. The allocator lives
// inside the table, so two registries (or two renderers) never collide.
// Released handles are gone for good: the counter only moves forward.

use crate::handle::{Handle, HandleAllocator};
use std::collections::BTreeMap;

pub struct Registry<H: Handle + Ord, T> {
    allocator: HandleAllocator,
    entries: BTreeMap<H, T>,
}

impl<H: Handle + Ord, T> Registry<H, T> {
    pub fn new() -> Self {
        Self {
            allocator: HandleAllocator::new(),
            entries: BTreeMap::new(),
        }
    }

    /// Store `value` under the next handle of this family.
    ///
    /// When the family is exhausted the value is handed back so the caller
    /// can destroy whatever GPU objects it owns.
    pub fn insert(&mut self, value: T) -> Result<H, T> {
        match self.reserve() {
            Some(handle) => {
                self.fill(handle, value);
                Ok(handle)
            }
            None => Err(value),
        }
    }

    /// Take the next handle without storing anything under it yet.
    ///
    /// The handle resolves once `fill` is called. A reserved handle that is
    /// never filled is simply retired.
    pub fn reserve(&mut self) -> Option<H> {
        self.allocator.allocate().map(H::from_index)
    }

    /// Store `value` under a handle obtained from `reserve`.
    pub fn fill(&mut self, handle: H, value: T) {
        debug_assert!(handle.is_valid() && usize::from(handle.index()) < self.allocator.issued());
        self.entries.insert(handle, value);
    }

    pub fn get(&self, handle: H) -> Option<&T> {
        if !handle.is_valid() {
            return None;
        }
        self.entries.get(&handle)
    }

    pub fn get_mut(&mut self, handle: H) -> Option<&mut T> {
        if !handle.is_valid() {
            return None;
        }
        self.entries.get_mut(&handle)
    }

    pub fn contains(&self, handle: H) -> bool {
        self.get(handle).is_some()
    }

    pub fn remove(&mut self, handle: H) -> Option<T> {
        self.entries.remove(&handle)
    }

    /// Entries in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> {
        self.entries.iter().map(|(h, v)| (*h, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (H, &mut T)> {
        self.entries.iter_mut().map(|(h, v)| (*h, v))
    }

    /// Remove every entry, newest first.
    pub fn drain(&mut self) -> Vec<(H, T)> {
        let mut all: Vec<(H, T)> = std::mem::take(&mut self.entries).into_iter().collect();
        all.reverse();
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H: Handle + Ord, T> Default for Registry<H, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
