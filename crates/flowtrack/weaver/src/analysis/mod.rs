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

//! Dataflow analysis: what every produced value is and where it came from

pub mod analyzer;
pub mod cfg;
pub mod frame;
pub mod heuristics;
pub mod interpreter;
pub mod merge;
pub mod value;

pub use analyzer::{Analysis, FlowAnalyzer, SolverOrder};
pub use cfg::ControlFlowGraph;
pub use frame::Frame;
pub use merge::{MergeIndex, MergeSlot, SlotKind};
pub use value::FlowValue;
