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

//! Flowtrack runtime
//!
//! Executes stack-machine classes, woven or not, and services the hooks woven code
//! calls to keep the provenance store up to date.

pub mod config;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod natives;
pub mod value;

pub use config::ExecutorConfig;
pub use error::{RuntimeError, RuntimeResult};
pub use executor::Executor;
pub use hooks::HookContext;
pub use natives::{NativeCall, NativeFn, NativeRegistry};
pub use value::{HeapObject, Value};
