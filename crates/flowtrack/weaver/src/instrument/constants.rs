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

//! Per-class constant table, registered on first use

use crate::error::WeaveResult;
use crate::ir::Method;
use flowtrack_core::{ClassConstant, ConstantRegistry, ConstantTable};
use std::sync::Arc;

pub struct ConstantPool {
    registry: Arc<ConstantRegistry>,
    class_name: String,
    table: Option<Arc<ConstantTable>>,
    section: Option<String>,
}

impl ConstantPool {
    pub fn new(registry: Arc<ConstantRegistry>, class_name: impl Into<String>) -> Self {
        Self { registry, class_name: class_name.into(), table: None, section: None }
    }

    pub fn table(&self) -> Option<&Arc<ConstantTable>> {
        self.table.as_ref()
    }

    /// Table of this class, with the section of `method` started
    fn table_for(&mut self, method: &Method) -> WeaveResult<Arc<ConstantTable>> {
        let table = match &self.table {
            Some(table) => table.clone(),
            None => {
                let table = self.registry.register_class(&self.class_name)?;
                self.table = Some(table.clone());
                table
            }
        };
        let signature = method.signature();
        if self.section.as_deref() != Some(signature.as_str()) {
            table.start_method(&method.description())?;
            self.section = Some(signature);
        }
        Ok(table)
    }

    pub fn track_constant(&mut self, method: &Method, value: i64) -> WeaveResult<ClassConstant> {
        Ok(self.table_for(method)?.register_constant(value)?)
    }

    /// Registers a string literal, returning its class id and offset
    pub fn track_string(&mut self, method: &Method, value: &str) -> WeaveResult<(u32, usize)> {
        let table = self.table_for(method)?;
        let offset = table.register_constant_string(value)?;
        Ok((table.class_id(), offset))
    }
}
