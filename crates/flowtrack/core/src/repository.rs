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

//! Tracker repository
//!
//! Process-wide association of tracked objects with their trackers. Objects are
//! identified by their `Arc` allocation and held weakly.

use crate::config::StoreConfig;
use crate::context;
use crate::error::TrackerResult;
use crate::point::TrackerPoint;
use crate::tracker::Tracker;
use crate::weak_map::WeakIdentityMap;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

static GLOBAL: OnceLock<Arc<TrackerRepository>> = OnceLock::new();

pub struct TrackerRepository {
    trackers: WeakIdentityMap<Arc<Tracker>>,
    operations: AtomicUsize,
    config: StoreConfig,
}

impl TrackerRepository {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            trackers: WeakIdentityMap::new(),
            operations: AtomicUsize::new(0),
            config,
        }
    }

    /// The shared repository, configured from the environment on first use
    pub fn global() -> Arc<TrackerRepository> {
        GLOBAL.get_or_init(|| Arc::new(Self::new(StoreConfig::from_env()))).clone()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Tracker of `object`, if it has one. Nothing while tracking is suspended.
    pub fn get_tracker<T: Any + Send + Sync>(&self, object: &Arc<T>) -> Option<Arc<Tracker>> {
        if !context::is_active() {
            return None;
        }
        self.tick();
        self.trackers.get(object)
    }

    /// Tracker of `object`, creating a default one when there is none yet.
    /// Concurrent first uses of one object all observe the same tracker.
    pub fn get_or_create_tracker<T: Any + Send + Sync>(&self, object: &Arc<T>) -> Option<Arc<Tracker>> {
        if !context::is_active() {
            return None;
        }
        let (tracker, _) = self.trackers.get_or_insert_with(object, Tracker::new_default);
        self.tick();
        Some(tracker)
    }

    /// Associates `tracker` with `object`, replacing any previous tracker
    pub fn set_tracker<T: Any + Send + Sync>(&self, object: &Arc<T>, tracker: Arc<Tracker>) {
        if !context::is_active() {
            return;
        }
        self.trackers.insert(object, tracker);
        self.tick();
    }

    /// Forgets the tracker of `object`; the next use creates a fresh one. Points already
    /// handed out keep referring to the old tracker.
    pub fn reset<T: Any + Send + Sync>(&self, object: &Arc<T>) -> Option<Arc<Tracker>> {
        self.trackers.remove(object)
    }

    /// Records that `target[target_index..target_index + length]` came from
    /// `source[source_index..]`, creating the target's tracker if needed
    pub fn set_source<T: Any + Send + Sync>(
        &self,
        target: &Arc<T>,
        target_index: usize,
        length: usize,
        source: Option<&Arc<Tracker>>,
        source_index: usize,
    ) -> TrackerResult<()> {
        if source.is_none() && self.get_tracker(target).is_none() {
            // nothing known and nothing to forget
            return Ok(());
        }
        match self.get_or_create_tracker(target) {
            Some(tracker) => tracker.set_source(target_index, length, source, source_index),
            None => Ok(()),
        }
    }

    /// Provenance of `object[index]`
    pub fn point<T: Any + Send + Sync>(&self, object: &Arc<T>, index: usize) -> Option<TrackerPoint> {
        let tracker = self.get_tracker(object)?;
        TrackerPoint::resolve(&tracker, index, 1, self.config.max_resolve_depth)
    }

    pub fn purge(&self) -> usize {
        let purged = self.trackers.purge();
        if purged > 0 {
            debug!(purged, remaining = self.trackers.len(), "purged dead tracker entries");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Counts one lookup or insertion, purging every `purge_interval` of them
    fn tick(&self) {
        let interval = self.config.purge_interval;
        if interval > 0 && (self.operations.fetch_add(1, Ordering::Relaxed) + 1) % interval == 0 {
            self.purge();
        }
    }
}

impl Default for TrackerRepository {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_get_tracker_without_tracker_is_none() {
        let repository = TrackerRepository::default();
        let object = Arc::new(vec![0u8; 4]);
        assert!(repository.get_tracker(&object).is_none());
    }

    #[test]
    fn test_concurrent_create_yields_one_tracker() {
        let repository = Arc::new(TrackerRepository::default());
        let object = Arc::new(vec![0u8; 16]);
        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let repository = repository.clone();
                let object = object.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    repository.get_or_create_tracker(&object).unwrap()
                })
            })
            .collect();
        let trackers: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

        let winner = repository.get_tracker(&object).unwrap();
        assert!(trackers.iter().all(|tracker| Arc::ptr_eq(tracker, &winner)));
        assert_eq!(repository.len(), 1);
    }

    #[test]
    fn test_tracker_released_with_object() {
        let repository = TrackerRepository::default();
        let object = Arc::new(vec![0u8; 4]);
        let tracker = Arc::downgrade(&repository.get_or_create_tracker(&object).unwrap());
        assert!(tracker.upgrade().is_some());

        drop(object);
        assert_eq!(repository.purge(), 1);
        assert!(tracker.upgrade().is_none());
    }

    #[test]
    fn test_set_source_creates_tracker_lazily() {
        let repository = TrackerRepository::default();
        let source = Tracker::origin();
        let object = Arc::new(vec![0u8; 4]);

        repository.set_source(&object, 0, 1, None, 0).unwrap();
        assert!(repository.get_tracker(&object).is_none());

        repository.set_source(&object, 1, 3, Some(&source), 0).unwrap();
        let point = repository.point(&object, 2).unwrap();
        assert!(Arc::ptr_eq(point.tracker(), &source));
        assert_eq!(point.index(), 1);
        assert!(repository.point(&object, 0).is_none());
    }

    #[test]
    fn test_reset_keeps_old_points_valid() {
        let repository = TrackerRepository::default();
        let source = Tracker::origin();
        let object = Arc::new(String::from("abc"));
        repository.set_source(&object, 0, 3, Some(&source), 5).unwrap();
        let old = repository.get_tracker(&object).unwrap();
        let old_point = repository.point(&object, 0).unwrap();

        let removed = repository.reset(&object).unwrap();
        assert!(Arc::ptr_eq(&removed, &old));
        assert!(repository.get_tracker(&object).is_none());

        let fresh = repository.get_or_create_tracker(&object).unwrap();
        assert!(!Arc::ptr_eq(&fresh, &old));
        assert_eq!(old_point.index(), 5);
        assert!(Arc::ptr_eq(old_point.tracker(), &source));
    }

    #[test]
    fn test_suspended_thread_sees_nothing() {
        let repository = TrackerRepository::default();
        let object = Arc::new(0u64);
        repository.get_or_create_tracker(&object).unwrap();

        let _guard = context::suspend();
        assert!(repository.get_tracker(&object).is_none());
        assert!(repository.get_or_create_tracker(&Arc::new(1u64)).is_none());
    }

    #[test]
    fn test_periodic_purge() {
        let repository = TrackerRepository::new(StoreConfig { purge_interval: 2, ..StoreConfig::default() });
        let first = Arc::new(1u8);
        repository.get_or_create_tracker(&first).unwrap();
        drop(first);
        let second = Arc::new(2u8);
        repository.get_or_create_tracker(&second).unwrap();
        assert_eq!(repository.len(), 1);
    }

    #[test]
    fn test_lookups_alone_purge_dead_entries() {
        let repository = TrackerRepository::new(StoreConfig { purge_interval: 3, ..StoreConfig::default() });
        let dead = Arc::new(1u8);
        let live = Arc::new(2u8);
        repository.get_or_create_tracker(&dead).unwrap();
        repository.get_or_create_tracker(&live).unwrap();
        drop(dead);
        assert_eq!(repository.len(), 2);

        // no insertions, only reads of the live object
        assert!(repository.get_tracker(&live).is_some());
        assert_eq!(repository.len(), 1);
    }
}
