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

//! Executor errors
//!
//! These are failures of the executed program itself, or of the executor, never of
//! provenance tracking: hooks degrade to unknown provenance instead of failing.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("operand stack underflow in {method} at {pc}")]
    StackUnderflow { method: String, pc: usize },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: String },

    #[error("null reference: {0}")]
    NullReference(String),

    #[error("index {index} out of bounds for length {length}")]
    IndexOutOfBounds { index: i64, length: usize },

    #[error("negative array size {0}")]
    NegativeArraySize(i32),

    #[error("division by zero")]
    DivisionByZero,

    #[error("unknown method {0}")]
    UnknownMethod(String),

    #[error("invalid method {method}: {reason}")]
    InvalidMethod { method: String, reason: String },

    #[error("local {index} out of range in {method}")]
    InvalidLocal { method: String, index: u16 },

    #[error("execution fell off the end of {0}")]
    FellOffEnd(String),

    #[error("call depth {0} exceeded")]
    CallDepthExceeded(usize),

    #[error("instruction limit {0} exceeded")]
    InstructionLimit(u64),

    #[error("native {method} failed: {reason}")]
    Native { method: String, reason: String },
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
