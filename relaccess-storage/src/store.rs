// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Shared aggregate store
//!
//! A capacity-bounded map of (database, relation) → [`AggregateEntry`],
//! shared by every transaction of the process.
//!
//! ## Locking
//! ```text
//! SharedAggregateStore
//! └── RwLock<AggregateMap>      (process-wide, coarse)
//!     ├── write(): merge batches, spill passes, drop cleanup
//!     └── read():  fill ratio, snapshots
//! ```
//! The capacity is fixed at construction. When the map is full, lookups of
//! existing keys still succeed but new keys are refused without touching the
//! map; the caller decides whether to spill or drop.

use ahash::RandomState;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use relaccess_core::{AccessKey, AggregateEntry, DatabaseId};
use std::collections::HashMap;

/// Overflow episode bookkeeping.
///
/// An episode starts with the first refused insert and ends when a new key
/// is inserted again or capacity is freed. Only the start of an episode is
/// reported, so a full store logs one warning instead of one per update.
#[derive(Debug, Default, Clone, Copy)]
struct OverflowEpisode {
    active: bool,
    episodes: u64,
    dropped_updates: u64,
}

/// The store contents; only reachable through the store lock
#[derive(Debug)]
pub struct AggregateMap {
    capacity: usize,
    entries: HashMap<AccessKey, AggregateEntry, RandomState>,
    overflow: OverflowEpisode,
}

impl AggregateMap {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            overflow: OverflowEpisode::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn find(&self, key: &AccessKey) -> Option<&AggregateEntry> {
        self.entries.get(key)
    }

    /// Existing entry, or a zeroed one if there is room.
    ///
    /// Returns `None` without mutating anything when the key is absent and
    /// the map is full. The flag is `true` for a freshly inserted entry.
    /// Inserting a new key ends the current overflow episode.
    pub fn find_or_insert(&mut self, key: AccessKey) -> Option<(&mut AggregateEntry, bool)> {
        if self.entries.contains_key(&key) {
            return self.entries.get_mut(&key).map(|entry| (entry, false));
        }
        if self.is_full() {
            return None;
        }
        self.overflow.active = false;
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| AggregateEntry::new(key));
        Some((entry, true))
    }

    pub fn remove(&mut self, key: &AccessKey) -> Option<AggregateEntry> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.overflow.active = false;
        }
        removed
    }

    /// Remove every entry of one database, returning how many were dropped
    pub fn remove_database(&mut self, database_id: DatabaseId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.database_id != database_id);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.overflow.active = false;
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &AggregateEntry> {
        self.entries.values()
    }

    /// Keys matching `filter`, in key order
    pub fn keys_where<F>(&self, filter: F) -> Vec<AccessKey>
    where
        F: Fn(&AccessKey) -> bool,
    {
        let mut keys: Vec<AccessKey> = self.entries.keys().filter(|k| filter(k)).copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Record a refused update.
    ///
    /// Returns `true` when this refusal starts a new overflow episode, i.e.
    /// when the caller should emit its warning.
    pub fn note_overflow(&mut self) -> bool {
        self.overflow.dropped_updates += 1;
        if self.overflow.active {
            return false;
        }
        self.overflow.active = true;
        self.overflow.episodes += 1;
        true
    }

    pub fn overflow_active(&self) -> bool {
        self.overflow.active
    }
}

/// Process-wide, capacity-bounded aggregate store
#[derive(Debug)]
pub struct SharedAggregateStore {
    capacity: usize,
    map: RwLock<AggregateMap>,
}

impl SharedAggregateStore {
    /// Create a store with a fixed number of slots
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            map: RwLock::new(AggregateMap::with_capacity(capacity)),
        }
    }

    /// Exclusive access for merges, spills and drop cleanup
    pub fn write(&self) -> RwLockWriteGuard<'_, AggregateMap> {
        self.map.write()
    }

    /// Shared access for read-only queries
    pub fn read(&self) -> RwLockReadGuard<'_, AggregateMap> {
        self.map.read()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Used capacity as an integer percentage (0..=100)
    pub fn fill_ratio(&self) -> u16 {
        let len = self.map.read().len();
        ((len * 100) / self.capacity) as u16
    }

    /// Copy of one entry
    pub fn get(&self, key: &AccessKey) -> Option<AggregateEntry> {
        self.map.read().find(key).cloned()
    }

    /// Copy of every entry of one database, ordered by relation id
    pub fn snapshot_database(&self, database_id: DatabaseId) -> Vec<AggregateEntry> {
        let mut entries: Vec<AggregateEntry> = self
            .map
            .read()
            .iter()
            .filter(|e| e.key.database_id == database_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.key);
        entries
    }

    /// Copy of the whole store, ordered by key
    pub fn snapshot(&self) -> Vec<AggregateEntry> {
        let mut entries: Vec<AggregateEntry> = self.map.read().iter().cloned().collect();
        entries.sort_by_key(|e| e.key);
        entries
    }

    /// Number of overflow episodes that produced a warning so far
    pub fn overflow_warnings(&self) -> u64 {
        self.map.read().overflow.episodes
    }

    /// Total number of updates refused because the store was full
    pub fn dropped_updates(&self) -> u64 {
        self.map.read().overflow.dropped_updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaccess_core::Permissions;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_find_or_insert_respects_capacity() {
        let store = SharedAggregateStore::new(2);
        let mut map = store.write();

        let (_, created) = map.find_or_insert(AccessKey::new(1, 10)).unwrap();
        assert!(created);
        let (_, created) = map.find_or_insert(AccessKey::new(1, 10)).unwrap();
        assert!(!created);
        map.find_or_insert(AccessKey::new(1, 11)).unwrap();
        assert!(map.is_full());

        // full: new key refused, existing key still found
        assert!(map.find_or_insert(AccessKey::new(1, 12)).is_none());
        assert_eq!(map.len(), 2);
        assert!(map.find_or_insert(AccessKey::new(1, 11)).is_some());
    }

    #[test]
    fn test_new_entry_is_zeroed() {
        let store = SharedAggregateStore::new(4);
        let mut map = store.write();
        let (entry, _) = map.find_or_insert(AccessKey::new(3, 7)).unwrap();
        assert_eq!(*entry, AggregateEntry::new(AccessKey::new(3, 7)));
        assert_eq!(entry.total_accesses(), 0);
    }

    #[test]
    fn test_remove_database() {
        let store = SharedAggregateStore::new(8);
        {
            let mut map = store.write();
            for rel in 0..3 {
                map.find_or_insert(AccessKey::new(1, rel)).unwrap();
                map.find_or_insert(AccessKey::new(2, rel)).unwrap();
            }
            assert_eq!(map.remove_database(1), 3);
            assert_eq!(map.remove_database(1), 0);
        }
        assert_eq!(store.len(), 3);
        assert!(store.snapshot_database(1).is_empty());
        assert_eq!(store.snapshot_database(2).len(), 3);
    }

    #[test]
    fn test_fill_ratio() {
        let store = SharedAggregateStore::new(200);
        assert_eq!(store.fill_ratio(), 0);
        {
            let mut map = store.write();
            for rel in 0..101 {
                map.find_or_insert(AccessKey::new(1, rel)).unwrap();
            }
        }
        assert_eq!(store.fill_ratio(), 50);
    }

    #[test]
    fn test_overflow_episode_reported_once() {
        let store = SharedAggregateStore::new(1);
        {
            let mut map = store.write();
            map.find_or_insert(AccessKey::new(1, 1)).unwrap();
            assert!(map.note_overflow());
            assert!(!map.note_overflow());
            assert!(map.overflow_active());

            // freeing capacity ends the episode
            map.remove(&AccessKey::new(1, 1));
            assert!(!map.overflow_active());
            map.find_or_insert(AccessKey::new(1, 2)).unwrap();
            assert!(map.note_overflow());
        }
        assert_eq!(store.overflow_warnings(), 2);
        assert_eq!(store.dropped_updates(), 3);
    }

    #[test]
    fn test_concurrent_updates() {
        let store = Arc::new(SharedAggregateStore::new(16));
        let mut handles = vec![];

        for t in 0..4u32 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for i in 0..1000u32 {
                    let mut map = store.write();
                    let (entry, _) = map.find_or_insert(AccessKey::new(1, i % 8)).unwrap();
                    entry.count_permissions(Permissions::SELECT);
                    entry.observe_read(t + 1, i as i64 + 1);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let total: u64 = store.snapshot().iter().map(|e| e.n_select).sum();
        assert_eq!(total, 4000);
        assert_eq!(store.len(), 8);
    }
}
