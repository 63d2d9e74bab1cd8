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

//! Error types for the provenance store

use crate::tracker::{TrackerId, TrackerRole};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("tracker {id} with role {role} does not accept content")]
    NotAppendable { id: TrackerId, role: TrackerRole },

    #[error("tracker {id} with role {role} is immutable")]
    Immutable { id: TrackerId, role: TrackerRole },

    #[error("tracker {0} already has a twin")]
    TwinAlreadySet(TrackerId),

    #[error("a tracker cannot be its own twin")]
    SelfTwin,

    #[error("argument slot {slot} out of range (maximum {maximum})")]
    ArgSlotOutOfRange { slot: usize, maximum: usize },

    #[error("unknown constant table: {0}")]
    UnknownConstantTable(u32),

    #[error("constant range {offset}+{length} outside table {class_id} of length {table_length}")]
    ConstantOutOfRange {
        class_id: u32,
        offset: usize,
        length: usize,
        table_length: usize,
    },
}

pub type TrackerResult<T> = Result<T, TrackerError>;
