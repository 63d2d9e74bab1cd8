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

//! Error types for analysis and weaving

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WeaveError {
    #[error("invalid descriptor '{descriptor}': {reason}")]
    InvalidDescriptor { descriptor: String, reason: String },

    #[error("invalid filter rule '{rule}' in '{rules}': {reason}")]
    InvalidFilterRule { rule: String, rules: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("stack underflow at instruction {insn}")]
    StackUnderflow { insn: usize },

    #[error("stack height mismatch at instruction {insn}: {expected} vs {found}")]
    StackHeightMismatch { insn: usize, expected: usize, found: usize },

    #[error("local {index} out of range at instruction {insn} (max locals {max_locals})")]
    InvalidLocal { insn: usize, index: u16, max_locals: u16 },

    #[error("unknown label L{label} referenced at instruction {insn}")]
    UnknownLabel { insn: usize, label: u32 },

    #[error("duplicate label L{label} at instruction {insn}")]
    DuplicateLabel { insn: usize, label: u32 },

    #[error("execution falls off the end of the method after instruction {insn}")]
    FallsOffEnd { insn: usize },

    #[error("unsupported instruction at {insn}: {reason}")]
    Unsupported { insn: usize, reason: String },

    #[error("analysis did not converge within {iterations} iterations")]
    NoConvergence { iterations: usize },

    #[error("constant table error: {0}")]
    Constants(#[from] flowtrack_core::TrackerError),
}

pub type WeaveResult<T> = Result<T, WeaveError>;
