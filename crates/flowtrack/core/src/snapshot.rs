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

//! Serializable view of a tracker's parts, gaps included

use crate::tracker::{Tracker, TrackerId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPart {
    pub length: usize,
    /// None marks a gap: data exists there but its provenance is unknown
    pub source: Option<TrackerId>,
    pub source_index: usize,
}

impl SnapshotPart {
    pub fn gap(length: usize) -> Self {
        Self { length, source: None, source_index: 0 }
    }

    pub fn is_gap(&self) -> bool {
        self.source.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub parts: Vec<SnapshotPart>,
}

impl TrackerSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gap(mut self, length: usize) -> Self {
        self.parts.push(SnapshotPart::gap(length));
        self
    }

    pub fn part(mut self, length: usize, source: &Tracker, source_index: usize) -> Self {
        self.parts.push(SnapshotPart { length, source: Some(source.id()), source_index });
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
