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

//! Flowtrack provenance store
//!
//! The run-time half of provenance tracking: trackers and their parts, points,
//! the weak tracker repository, the field side-table, call records, constant
//! tables and the per-thread context that suspends tracking.

pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod field_repository;
pub mod invocation;
pub mod point;
pub mod repository;
pub mod snapshot;
pub mod tracker;
pub mod twin;
pub mod weak_map;

pub use config::StoreConfig;
pub use constants::{ClassConstant, ConstantRegistry, ConstantTable};
pub use context::{SuspendGuard, suspend};
pub use error::{TrackerError, TrackerResult};
pub use field_repository::FieldRepository;
pub use invocation::{Invocation, MAX_ARG_SLOTS};
pub use point::TrackerPoint;
pub use repository::TrackerRepository;
pub use snapshot::{SnapshotPart, TrackerSnapshot};
pub use tracker::{Part, Tracker, TrackerId, TrackerRole};
pub use twin::{TwinMarker, TwinSync};
