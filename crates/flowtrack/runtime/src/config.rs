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

//! Executor configuration

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Nested calls allowed before execution is aborted
    pub max_call_depth: usize,
    /// Instructions executed per top-level invocation before execution is aborted
    pub max_instructions: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 256,
            max_instructions: 10_000_000,
        }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("FLOWTRACK_MAX_CALL_DEPTH") {
            match value.parse::<usize>() {
                Ok(depth) if depth > 0 => config.max_call_depth = depth,
                _ => warn!("Invalid FLOWTRACK_MAX_CALL_DEPTH '{value}', using default"),
            }
        }

        if let Ok(value) = std::env::var("FLOWTRACK_MAX_INSTRUCTIONS") {
            match value.parse::<u64>() {
                Ok(limit) if limit > 0 => config.max_instructions = limit,
                _ => warn!("Invalid FLOWTRACK_MAX_INSTRUCTIONS '{value}', using default"),
            }
        }

        config
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_max_instructions(mut self, limit: u64) -> Self {
        self.max_instructions = limit;
        self
    }
}
