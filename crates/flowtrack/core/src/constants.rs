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

//! Constant tables
//!
//! Every compiled unit that tracks a literal gets a table: an origin tracker whose
//! content is a readable listing of the unit's literals. Synthesized code refers to a
//! literal by `(class id, offset, length)` into that listing.
//!
//! ```text
//! class demo.Parser
//! char next(int):
//!   A
//!   0xa (10)
//! ```

use crate::error::{TrackerError, TrackerResult};
use crate::point::TrackerPoint;
use crate::tracker::Tracker;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::debug;

static GLOBAL: OnceLock<Arc<ConstantRegistry>> = OnceLock::new();

/// Location of one literal inside a constant table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassConstant {
    pub class_id: u32,
    pub offset: usize,
    pub length: usize,
}

pub struct ConstantTable {
    class_id: u32,
    class_name: String,
    tracker: Arc<Tracker>,
    // offset computation and append must not interleave
    write: Mutex<()>,
}

impl ConstantTable {
    fn new(class_id: u32, class_name: &str) -> TrackerResult<Self> {
        let tracker = Tracker::origin();
        tracker.set_descriptor(format!("class {}", class_name.replace('/', ".")));
        tracker.append(format!("class {}\n", class_name.replace('/', ".")).as_bytes())?;
        Ok(Self {
            class_id,
            class_name: class_name.to_string(),
            tracker,
            write: Mutex::new(()),
        })
    }

    pub fn class_id(&self) -> u32 {
        self.class_id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    pub fn content(&self) -> String {
        self.tracker.content_text()
    }

    /// Starts the section of the method whose literals follow
    pub fn start_method(&self, description: &str) -> TrackerResult<()> {
        let _write = self.write.lock();
        self.tracker.append(format!("{description}:\n").as_bytes())
    }

    /// Registers a scalar literal: printable ASCII as itself, anything else as hex and decimal
    pub fn register_constant(&self, value: i64) -> TrackerResult<ClassConstant> {
        let rendered = match u8::try_from(value) {
            Ok(byte) if (32..127).contains(&byte) => char::from(byte).to_string(),
            _ => format!("0x{value:x} ({value})"),
        };
        let _write = self.write.lock();
        self.tracker.append(b"  ")?;
        let offset = self.tracker.len();
        self.tracker.append(rendered.as_bytes())?;
        self.tracker.append(b"\n")?;
        Ok(ClassConstant { class_id: self.class_id, offset, length: rendered.len() })
    }

    /// Registers a string literal, returning the offset of its first byte
    pub fn register_constant_string(&self, value: &str) -> TrackerResult<usize> {
        let _write = self.write.lock();
        self.tracker.append(b"  ")?;
        let offset = self.tracker.len();
        self.tracker.append(value.as_bytes())?;
        self.tracker.append(b"\n")?;
        Ok(offset)
    }

    pub fn point(&self, offset: usize, length: usize) -> TrackerResult<TrackerPoint> {
        let table_length = self.tracker.len();
        if offset + length > table_length {
            return Err(TrackerError::ConstantOutOfRange {
                class_id: self.class_id,
                offset,
                length,
                table_length,
            });
        }
        Ok(TrackerPoint::new(self.tracker.clone(), offset, length))
    }
}

/// All constant tables of the process, indexed by class id
#[derive(Default)]
pub struct ConstantRegistry {
    tables: RwLock<Vec<Arc<ConstantTable>>>,
}

impl ConstantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Arc<ConstantRegistry> {
        GLOBAL.get_or_init(|| Arc::new(Self::new())).clone()
    }

    pub fn register_class(&self, class_name: &str) -> TrackerResult<Arc<ConstantTable>> {
        let mut tables = self.tables.write();
        let class_id = tables.len() as u32;
        let table = Arc::new(ConstantTable::new(class_id, class_name)?);
        tables.push(table.clone());
        debug!(class_id, class_name, "registered constant table");
        Ok(table)
    }

    pub fn get(&self, class_id: u32) -> TrackerResult<Arc<ConstantTable>> {
        self.tables
            .read()
            .get(class_id as usize)
            .cloned()
            .ok_or(TrackerError::UnknownConstantTable(class_id))
    }

    pub fn point(&self, class_id: u32, offset: usize, length: usize) -> TrackerResult<TrackerPoint> {
        self.get(class_id)?.point(offset, length)
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_format() {
        let registry = ConstantRegistry::new();
        let table = registry.register_class("demo/Parser").unwrap();
        table.start_method("char next(int)").unwrap();
        let letter = table.register_constant('A' as i64).unwrap();
        let newline = table.register_constant(10).unwrap();

        let content = table.content();
        assert_eq!(content, "class demo.Parser\nchar next(int):\n  A\n  0xa (10)\n");
        assert_eq!(&content[letter.offset..letter.offset + letter.length], "A");
        assert_eq!(&content[newline.offset..newline.offset + newline.length], "0xa (10)");
        assert_eq!(letter.class_id, table.class_id());
    }

    #[test]
    fn test_string_constant() {
        let registry = ConstantRegistry::new();
        let table = registry.register_class("demo/Greeter").unwrap();
        let offset = table.register_constant_string("hello").unwrap();
        assert_eq!(&table.content()[offset..offset + 5], "hello");
    }

    #[test]
    fn test_class_ids_are_sequential() {
        let registry = ConstantRegistry::new();
        let first = registry.register_class("a/A").unwrap();
        let second = registry.register_class("b/B").unwrap();
        assert_eq!(first.class_id(), 0);
        assert_eq!(second.class_id(), 1);
        assert!(Arc::ptr_eq(&registry.get(1).unwrap(), &second));
        assert_eq!(registry.get(2).err(), Some(TrackerError::UnknownConstantTable(2)));
    }

    #[test]
    fn test_constant_point_resolves_to_table() {
        let registry = ConstantRegistry::new();
        let table = registry.register_class("demo/Digits").unwrap();
        let constant = table.register_constant(200).unwrap();
        let point = registry.point(constant.class_id, constant.offset, constant.length).unwrap();
        assert!(Arc::ptr_eq(point.tracker(), table.tracker()));
        assert_eq!(point.length(), "0xc8 (200)".len());
        assert!(registry.point(constant.class_id, 10_000, 1).is_err());
    }
}
