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

//! Tracker points: the run-time currency of provenance

use crate::tracker::{Tracker, TrackerRole};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Default bound on how many default trackers a point lookup follows
pub const DEFAULT_RESOLVE_DEPTH: usize = 16;

/// Immutable `(tracker, index, length)` reference to where a value came from
#[derive(Clone)]
pub struct TrackerPoint {
    tracker: Arc<Tracker>,
    index: usize,
    length: usize,
}

impl TrackerPoint {
    pub fn new(tracker: Arc<Tracker>, index: usize, length: usize) -> Self {
        Self { tracker, index, length }
    }

    /// Resolves `index` of `tracker` to the deepest available source, or None for a gap
    pub fn of(tracker: &Arc<Tracker>, index: usize) -> Option<Self> {
        Self::resolve(tracker, index, 1, DEFAULT_RESOLVE_DEPTH)
    }

    pub fn resolve(tracker: &Arc<Tracker>, index: usize, length: usize, max_depth: usize) -> Option<Self> {
        let mut current = tracker.clone();
        let mut index = index;
        for _ in 0..max_depth {
            match current.role() {
                TrackerRole::Default | TrackerRole::Sink => {
                    let (start, part) = current.entry_at(index)?;
                    index = part.source_index + (index - start);
                    current = part.source;
                }
                TrackerRole::Fixed if index >= current.len() => return None,
                TrackerRole::Origin | TrackerRole::Fixed | TrackerRole::Tag => {
                    return Some(Self::new(current, index, length));
                }
            }
        }
        warn!(tracker = %tracker.id(), index, max_depth, "point resolution did not terminate, treating as unknown");
        None
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn with_length(&self, length: usize) -> Self {
        Self::new(self.tracker.clone(), self.index, length)
    }
}

impl PartialEq for TrackerPoint {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.tracker, &other.tracker) && self.index == other.index && self.length == other.length
    }
}

impl Eq for TrackerPoint {}

impl fmt::Debug for TrackerPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrackerPoint({}, {}, {})", self.tracker.id(), self.index, self.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_tracker_points_to_itself() {
        let fixed = Tracker::fixed(b"hello".to_vec());
        for i in 0..5 {
            assert_eq!(fixed.point(i), Some(TrackerPoint::new(fixed.clone(), i, 1)));
        }
        assert_eq!(fixed.point(5), None);
    }

    #[test]
    fn test_point_follows_default_tracker() {
        let origin = Tracker::origin();
        origin.append(b"0123456789abc").unwrap();
        let array = Tracker::new_default();
        array.set_source(0, 3, Some(&origin), 10).unwrap();

        let point = array.point(1).unwrap();
        assert!(Arc::ptr_eq(point.tracker(), &origin));
        assert_eq!(point.index(), 11);
        assert_eq!(point.length(), 1);
        assert_eq!(array.point(3), None);
    }

    #[test]
    fn test_point_of_untouched_default_tracker_is_none() {
        assert_eq!(Tracker::new_default().point(0), None);
    }

    #[test]
    fn test_with_length() {
        let origin = Tracker::origin();
        let point = TrackerPoint::new(origin.clone(), 4, 1).with_length(3);
        assert_eq!(point, TrackerPoint::new(origin, 4, 3));
    }
}
