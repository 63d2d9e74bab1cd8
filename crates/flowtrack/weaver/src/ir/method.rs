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

//! Methods and classes

use super::insn::{Insn, LabelId};
use super::types::MethodDesc;
use crate::error::{WeaveError, WeaveResult};
use flowtrack_core::Invocation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub owner: String,
    pub name: String,
    pub desc: MethodDesc,
    #[serde(default)]
    pub is_static: bool,
    pub max_locals: u16,
    #[serde(default)]
    pub max_stack: u16,
    pub insns: Vec<Insn>,
}

impl Method {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, desc: &str, is_static: bool) -> WeaveResult<Self> {
        let desc = MethodDesc::parse(desc)?;
        let mut method = Self {
            owner: owner.into(),
            name: name.into(),
            desc,
            is_static,
            max_locals: 0,
            max_stack: 0,
            insns: Vec::new(),
        };
        method.max_locals = method.param_slots() as u16;
        Ok(method)
    }

    /// Sets the body and grows `max_locals` to cover every local it touches
    pub fn with_insns(mut self, insns: Vec<Insn>) -> Self {
        let used = insns.iter().filter_map(Insn::local_index).map(|index| index + 1).max().unwrap_or(0);
        self.max_locals = self.max_locals.max(used);
        self.insns = insns;
        self
    }

    pub fn with_max_stack(mut self, max_stack: u16) -> Self {
        self.max_stack = max_stack;
        self
    }

    /// Locals taken by the receiver and the parameters
    pub fn param_slots(&self) -> usize {
        self.desc.params.len() + usize::from(!self.is_static)
    }

    pub fn signature(&self) -> String {
        Invocation::signature(&self.name, &self.desc.descriptor())
    }

    /// Human readable form, as used in constant tables: `char next(int)`
    pub fn description(&self) -> String {
        let params: Vec<String> = self.desc.params.iter().map(ToString::to_string).collect();
        format!("{} {}({})", self.desc.ret, self.name, params.join(", "))
    }

    pub fn label_positions(&self) -> WeaveResult<HashMap<LabelId, usize>> {
        let mut labels = HashMap::new();
        for (index, insn) in self.insns.iter().enumerate() {
            if let Insn::Label(label) = insn {
                if labels.insert(*label, index).is_some() {
                    return Err(WeaveError::DuplicateLabel { insn: index, label: *label });
                }
            }
        }
        Ok(labels)
    }

    pub fn listing(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} {}{} locals={} stack={}",
            if self.is_static { "static" } else { "virtual" },
            self.name,
            self.desc,
            self.max_locals,
            self.max_stack
        );
        for (index, insn) in self.insns.iter().enumerate() {
            let _ = writeln!(out, "{index:>4}  {insn}");
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
    pub name: String,
    pub methods: Vec<Method>,
}

impl Class {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), methods: Vec::new() }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|method| method.name == name)
    }

    pub fn listing(&self) -> String {
        let mut out = format!("class {}\n", self.name);
        for method in &self.methods {
            out.push('\n');
            out.push_str(&method.listing());
        }
        out
    }
}
