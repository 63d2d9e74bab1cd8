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

//! Flowtrack weaver
//!
//! Static side of provenance tracking: a dataflow analysis that works out where every
//! byte- or char-sized value in a method came from, and a synthesizer that inserts the
//! calls recording that origin whenever such a value is stored, passed, returned or
//! concatenated.

pub mod analysis;
pub mod config;
pub mod error;
pub mod filter;
pub mod instrument;
pub mod ir;
pub mod weaver;

pub use analysis::{Analysis, FlowAnalyzer, FlowValue, SolverOrder};
pub use config::WeaverConfig;
pub use error::{WeaveError, WeaveResult};
pub use filter::ClassFilter;
pub use ir::{Class, Hook, Insn, Method, MethodDesc, Type};
pub use weaver::{MethodFailure, WeaveReport, Weaver};
