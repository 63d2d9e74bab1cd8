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

pub mod run;
pub mod weave;

use crate::error::ToolResult;
use flowtrack_weaver::{Class, WeaverConfig};
use std::path::Path;

/// Reads a class from its JSON form
pub fn load_class(path: &Path) -> ToolResult<Class> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Configuration from a JSON file, or from the environment when no file is given
pub fn load_config(path: Option<&Path>) -> ToolResult<WeaverConfig> {
    match path {
        Some(path) => Ok(WeaverConfig::from_json(&std::fs::read_to_string(path)?)?),
        None => Ok(WeaverConfig::from_env()),
    }
}
