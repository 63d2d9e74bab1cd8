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

//! Twin synchronization
//!
//! Twins are the two directions of one channel. Markers record where the
//! conversation switched sides, so both contents can be interleaved later.

use crate::tracker::TrackerId;
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TwinMarker {
    /// The tracker that started receiving content
    pub to: TrackerId,
    /// Position in `to` where that happened
    pub to_index: usize,
    /// Corresponding position in the other tracker
    pub from_index: usize,
}

#[derive(Debug, Default)]
struct TwinState {
    previous: Option<TrackerId>,
    markers: Vec<TwinMarker>,
}

#[derive(Debug)]
pub struct TwinSync {
    first: TrackerId,
    second: TrackerId,
    state: Mutex<TwinState>,
}

impl TwinSync {
    pub(crate) fn new(first: TrackerId, second: TrackerId) -> Self {
        Self { first, second, state: Mutex::new(TwinState::default()) }
    }

    pub(crate) fn before_append(&self, tracker: TrackerId, own_length: usize, other_length: usize) {
        let mut state = self.state.lock();
        if state.previous.is_some_and(|previous| previous != tracker) {
            state.markers.push(TwinMarker { to: tracker, to_index: own_length, from_index: other_length });
        }
        state.previous = Some(tracker);
    }

    pub fn other(&self, tracker: TrackerId) -> TrackerId {
        if tracker == self.first { self.second } else { self.first }
    }

    pub fn markers(&self) -> Vec<TwinMarker> {
        self.state.lock().markers.clone()
    }
}

#[cfg(test)]
mod tests {
    use crate::tracker::Tracker;

    #[test]
    fn test_markers_record_side_switches() {
        let (input, output) = Tracker::twins("conversation");
        output.append(b"GET /").unwrap();
        output.append(b" HTTP").unwrap();
        input.append(b"200 OK").unwrap();
        output.append(b"bye").unwrap();

        let sync = input.twin_sync().unwrap();
        let markers = sync.markers();
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].to, input.id());
        assert_eq!(markers[0].to_index, 0);
        assert_eq!(markers[0].from_index, 10);
        assert_eq!(markers[1].to, output.id());
        assert_eq!(markers[1].to_index, 10);
        assert_eq!(markers[1].from_index, 6);
        assert_eq!(sync.other(input.id()), output.id());
    }

    #[test]
    fn test_no_markers_without_twin() {
        let origin = Tracker::origin();
        origin.append(b"abc").unwrap();
        assert!(origin.twin_sync().is_none());
    }
}
