// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Weak identity map keyed by `Arc` allocations
//!
//! Entries hold only a `Weak` to their key object, so the map never keeps a tracked
//! object alive. While an entry exists its `Weak` pins the key's allocation, so the
//! address cannot be reused by another object; an entry whose object died is dead
//! and gets dropped by [`WeakIdentityMap::purge`] or replaced on the next insert.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::any::Any;
use std::sync::{Arc, Weak};

pub type Object = dyn Any + Send + Sync;

struct WeakEntry<V> {
    object: Weak<Object>,
    value: V,
}

impl<V> WeakEntry<V> {
    fn is_live(&self) -> bool {
        self.object.strong_count() > 0
    }
}

pub struct WeakIdentityMap<V> {
    entries: DashMap<usize, WeakEntry<V>>,
}

fn identity<T: ?Sized>(object: &Arc<T>) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

impl<V: Clone> WeakIdentityMap<V> {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub fn get<T: Any + Send + Sync>(&self, object: &Arc<T>) -> Option<V> {
        self.entries
            .get(&identity(object))
            .filter(|entry| entry.is_live())
            .map(|entry| entry.value.clone())
    }

    /// Returns the value for `object`, inserting `create()` first if there is none.
    /// Atomic per key: concurrent callers for the same object all get the same value.
    /// The flag is true when this call inserted.
    pub fn get_or_insert_with<T: Any + Send + Sync>(&self, object: &Arc<T>, create: impl FnOnce() -> V) -> (V, bool) {
        match self.entries.entry(identity(object)) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live() {
                    (occupied.get().value.clone(), false)
                } else {
                    let value = create();
                    occupied.insert(WeakEntry { object: downgrade(object), value: value.clone() });
                    (value, true)
                }
            }
            Entry::Vacant(vacant) => {
                let value = create();
                vacant.insert(WeakEntry { object: downgrade(object), value: value.clone() });
                (value, true)
            }
        }
    }

    pub fn insert<T: Any + Send + Sync>(&self, object: &Arc<T>, value: V) {
        self.entries.insert(identity(object), WeakEntry { object: downgrade(object), value });
    }

    /// Mutates the value of `object` in place, inserting `create()` first if needed
    pub fn update<T: Any + Send + Sync, R>(
        &self,
        object: &Arc<T>,
        create: impl FnOnce() -> V,
        update: impl FnOnce(&mut V) -> R,
    ) -> R {
        match self.entries.entry(identity(object)) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_live() {
                    occupied.insert(WeakEntry { object: downgrade(object), value: create() });
                }
                update(&mut occupied.get_mut().value)
            }
            Entry::Vacant(vacant) => {
                let mut entry = vacant.insert(WeakEntry { object: downgrade(object), value: create() });
                update(&mut entry.value)
            }
        }
    }

    pub fn remove<T: Any + Send + Sync>(&self, object: &Arc<T>) -> Option<V> {
        self.entries
            .remove(&identity(object))
            .filter(|(_, entry)| entry.is_live())
            .map(|(_, entry)| entry.value)
    }

    /// Drops entries whose object is gone; returns how many were dropped
    pub fn purge(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live());
        before.saturating_sub(self.entries.len())
    }

    /// Number of entries, dead ones not yet purged included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone> Default for WeakIdentityMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn downgrade<T: Any + Send + Sync>(object: &Arc<T>) -> Weak<Object> {
    let strong: Arc<Object> = object.clone();
    Arc::downgrade(&strong)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_dies_with_object() {
        let map = WeakIdentityMap::new();
        let object = Arc::new(vec![1u8, 2, 3]);
        map.insert(&object, "tracked");
        assert_eq!(map.get(&object), Some("tracked"));

        drop(object);
        assert_eq!(map.len(), 1);
        assert_eq!(map.purge(), 1);
        assert!(map.is_empty());
    }

    #[test]
    fn test_insert_through_concrete_arc() {
        let map = WeakIdentityMap::new();
        let object: Arc<Vec<char>> = Arc::new(vec!['a']);
        let (value, inserted) = map.get_or_insert_with(&object, || 3);
        assert!(inserted);
        assert_eq!(map.get(&object), Some(value));
        assert_eq!(map.remove(&object), Some(3));
    }

    #[test]
    fn test_map_does_not_keep_object_alive() {
        let map = WeakIdentityMap::new();
        let object = Arc::new(String::from("x"));
        map.insert(&object, 1);
        let weak = Arc::downgrade(&object);
        drop(object);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_get_or_insert_reports_insertion() {
        let map = WeakIdentityMap::new();
        let object = Arc::new(0u32);
        assert_eq!(map.get_or_insert_with(&object, || 5), (5, true));
        assert_eq!(map.get_or_insert_with(&object, || 6), (5, false));
    }

    #[test]
    fn test_update_in_place() {
        let map: WeakIdentityMap<Vec<u32>> = WeakIdentityMap::new();
        let object = Arc::new(());
        map.update(&object, Vec::new, |values| values.push(1));
        map.update(&object, Vec::new, |values| values.push(2));
        assert_eq!(map.get(&object), Some(vec![1, 2]));
    }

    #[test]
    fn test_update_after_purge_starts_fresh() {
        let map: WeakIdentityMap<Vec<u32>> = WeakIdentityMap::new();
        let first = Arc::new(7u64);
        map.update(&first, Vec::new, |values| values.push(1));
        assert_eq!(map.get(&first), Some(vec![1]));

        drop(first);
        assert_eq!(map.purge(), 1);
        let second = Arc::new(8u64);
        let len = map.update(&second, Vec::new, |values| {
            values.push(2);
            values.len()
        });
        assert_eq!(len, 1);
    }
}
