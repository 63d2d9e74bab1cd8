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

//! Class include/exclude rules
//!
//! A rule list is comma separated; every rule starts with `+` (include) or `-`
//! (exclude) followed by a class name, or a prefix ending in `*`. Dots and slashes
//! are interchangeable. `%recommended` expands to [`RECOMMENDED_RULES`]. The first
//! matching rule decides; a class no rule matches is excluded. Nested classes follow
//! their outermost class.

use crate::error::{WeaveError, WeaveResult};

/// Classes that must never be woven
pub const RECOMMENDED_RULES: &str = "-flowtrack.*,-java.lang.invoke.*";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Exact(String),
    Prefix(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    include: bool,
    pattern: Pattern,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFilter {
    rules: Vec<Rule>,
}

impl ClassFilter {
    pub fn parse(rules: &str) -> WeaveResult<Self> {
        let mut parsed = Vec::new();
        Self::parse_into(rules, rules, &mut parsed)?;
        Ok(Self { rules: parsed })
    }

    fn parse_into(rules: &str, whole: &str, parsed: &mut Vec<Rule>) -> WeaveResult<()> {
        for rule in rules.split(',').map(str::trim).filter(|rule| !rule.is_empty()) {
            if rule == "%recommended" {
                Self::parse_into(RECOMMENDED_RULES, whole, parsed)?;
                continue;
            }
            let invalid = |reason: &str| WeaveError::InvalidFilterRule {
                rule: rule.to_string(),
                rules: whole.to_string(),
                reason: reason.to_string(),
            };
            let include = match rule.as_bytes()[0] {
                b'+' => true,
                b'-' => false,
                _ => return Err(invalid("must start with '+' or '-'")),
            };
            let body = rule[1..].replace('.', "/");
            let pattern = match body.strip_suffix('*') {
                Some(prefix) if prefix.contains('*') => return Err(invalid("'*' is only allowed at the end")),
                Some(prefix) => Pattern::Prefix(prefix.to_string()),
                None if body.contains('*') => return Err(invalid("'*' is only allowed at the end")),
                None => Pattern::Exact(body),
            };
            parsed.push(Rule { include, pattern });
        }
        Ok(())
    }

    /// Whether the class named `class_name` (slash or dot separated) is included
    pub fn include(&self, class_name: &str) -> bool {
        let name = class_name.replace('.', "/");
        let outer = name.split('$').next().unwrap_or(&name);
        self.rules
            .iter()
            .find(|rule| match &rule.pattern {
                Pattern::Exact(exact) => exact == outer,
                Pattern::Prefix(prefix) => outer.starts_with(prefix.as_str()),
            })
            .is_some_and(|rule| rule.include)
    }
}
