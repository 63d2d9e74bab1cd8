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

//! Provenance store configuration

use crate::point::DEFAULT_RESOLVE_DEPTH;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Dead repository entries are purged once every this many lookups and insertions,
    /// so an entry outlives its object by at most that many operations; 0 disables it
    pub purge_interval: usize,
    /// Maximum number of trackers followed when resolving a point
    pub max_resolve_depth: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            purge_interval: 4096,
            max_resolve_depth: DEFAULT_RESOLVE_DEPTH,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(interval) = env_usize("FLOWTRACK_PURGE_INTERVAL") {
            config.purge_interval = interval;
        }

        if let Some(depth) = env_usize("FLOWTRACK_MAX_RESOLVE_DEPTH") {
            config.max_resolve_depth = depth.max(1);
        }

        config
    }
}

fn env_usize(name: &str) -> Option<usize> {
    let value = std::env::var(name).ok()?;
    match value.parse::<usize>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Invalid {name} '{value}', using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"purge_interval": 8}"#).unwrap();
        assert_eq!(config.purge_interval, 8);
        assert_eq!(config.max_resolve_depth, DEFAULT_RESOLVE_DEPTH);
    }
}
