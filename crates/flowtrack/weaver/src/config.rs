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

//! Weaver configuration

use crate::analysis::analyzer::DEFAULT_MAX_ITERATIONS;
use crate::analysis::SolverOrder;
use crate::error::{WeaveError, WeaveResult};
use crate::filter::ClassFilter;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_FILTER: &str = "%recommended,+*";
pub const DEFAULT_BREAK_STRING_INTERNING: &str = "%recommended,+*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaverConfig {
    /// Rules selecting the classes to weave
    pub filter: String,
    /// Rules selecting the classes whose string literals get their own instances
    pub break_string_interning: String,
    /// Solver iterations per method before analysis gives up
    pub max_iterations: usize,
    pub solver_order: SolverOrder,
}

impl Default for WeaverConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            break_string_interning: DEFAULT_BREAK_STRING_INTERNING.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            solver_order: SolverOrder::Fifo,
        }
    }
}

impl WeaverConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(filter) = std::env::var("FLOWTRACK_FILTER") {
            config.filter = filter;
        }

        if let Ok(rules) = std::env::var("FLOWTRACK_BREAK_STRING_INTERNING") {
            config.break_string_interning = rules;
        }

        if let Ok(value) = std::env::var("FLOWTRACK_MAX_ITERATIONS") {
            match value.parse::<usize>() {
                Ok(iterations) if iterations > 0 => config.max_iterations = iterations,
                _ => warn!("Invalid FLOWTRACK_MAX_ITERATIONS '{value}', using default"),
            }
        }

        if let Ok(value) = std::env::var("FLOWTRACK_SOLVER_ORDER") {
            match value.parse() {
                Ok(order) => config.solver_order = order,
                Err(_) => warn!("Invalid FLOWTRACK_SOLVER_ORDER '{value}', using default"),
            }
        }

        config
    }

    pub fn from_json(json: &str) -> WeaveResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| WeaveError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_break_string_interning(mut self, rules: impl Into<String>) -> Self {
        self.break_string_interning = rules.into();
        self
    }

    pub fn with_solver_order(mut self, order: SolverOrder) -> Self {
        self.solver_order = order;
        self
    }

    pub fn validate(&self) -> WeaveResult<()> {
        ClassFilter::parse(&self.filter)?;
        ClassFilter::parse(&self.break_string_interning)?;
        if self.max_iterations == 0 {
            return Err(WeaveError::InvalidConfig("max_iterations must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_overrides() {
        let config = WeaverConfig::from_json(r#"{"filter": "+demo.*", "solver_order": "lifo"}"#).unwrap();
        assert_eq!(config.filter, "+demo.*");
        assert_eq!(config.solver_order, SolverOrder::Lifo);
        assert_eq!(config.break_string_interning, DEFAULT_BREAK_STRING_INTERNING);
    }

    #[test]
    fn test_invalid_json_config() {
        assert!(matches!(WeaverConfig::from_json(r#"{"filter": "demo"}"#), Err(WeaveError::InvalidFilterRule { .. })));
        assert!(matches!(WeaverConfig::from_json(r#"{"max_iterations": 0}"#), Err(WeaveError::InvalidConfig(_))));
        assert!(matches!(WeaverConfig::from_json("not json"), Err(WeaveError::InvalidConfig(_))));
    }
}
