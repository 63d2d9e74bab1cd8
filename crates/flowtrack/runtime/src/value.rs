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

//! Run-time values and heap objects

use crate::error::{RuntimeError, RuntimeResult};
use flowtrack_core::{Invocation, TrackerPoint};
use flowtrack_weaver::ir::Type;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Object living on the executor's heap; identity is the `Arc` allocation
pub enum HeapObject {
    Array { elem: Type, values: RwLock<Vec<Value>> },
    Str(Vec<char>),
    Instance { class: String, fields: Mutex<HashMap<String, Value>> },
}

impl HeapObject {
    pub fn new_array(elem: Type, length: usize) -> Arc<Self> {
        let values = vec![Value::default_for(&elem); length];
        Arc::new(HeapObject::Array { elem, values: RwLock::new(values) })
    }

    pub fn char_array(text: &str) -> Arc<Self> {
        let values = text.chars().map(|c| Value::Int(c as i32)).collect();
        Arc::new(HeapObject::Array { elem: Type::Char, values: RwLock::new(values) })
    }

    pub fn string(text: &str) -> Arc<Self> {
        Arc::new(HeapObject::Str(text.chars().collect()))
    }

    pub fn instance(class: impl Into<String>) -> Arc<Self> {
        Arc::new(HeapObject::Instance { class: class.into(), fields: Mutex::new(HashMap::new()) })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HeapObject::Array { .. } => "array",
            HeapObject::Str(_) => "string",
            HeapObject::Instance { .. } => "instance",
        }
    }

    pub fn length(&self) -> RuntimeResult<usize> {
        match self {
            HeapObject::Array { values, .. } => Ok(values.read().len()),
            HeapObject::Str(chars) => Ok(chars.len()),
            HeapObject::Instance { .. } => Err(RuntimeError::TypeMismatch { expected: "array", found: "instance".into() }),
        }
    }

    /// Contents of a string, or of a char array read as text
    pub fn text(&self) -> Option<String> {
        match self {
            HeapObject::Str(chars) => Some(chars.iter().collect()),
            HeapObject::Array { elem: Type::Char, values } => Some(
                values
                    .read()
                    .iter()
                    .map(|value| match value {
                        Value::Int(code) => char::from_u32(*code as u32).unwrap_or(char::REPLACEMENT_CHARACTER),
                        _ => char::REPLACEMENT_CHARACTER,
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn load(&self, index: i32) -> RuntimeResult<Value> {
        match self {
            HeapObject::Array { values, .. } => {
                let values = values.read();
                element_index(index, values.len()).map(|i| values[i].clone())
            }
            other => Err(RuntimeError::TypeMismatch { expected: "array", found: other.kind().into() }),
        }
    }

    /// Stores `value` narrowed to the array's element type
    pub fn store(&self, index: i32, value: Value) -> RuntimeResult<()> {
        match self {
            HeapObject::Array { elem, values } => {
                let value = value.narrowed(elem);
                let mut values = values.write();
                let slot = element_index(index, values.len())?;
                values[slot] = value;
                Ok(())
            }
            other => Err(RuntimeError::TypeMismatch { expected: "array", found: other.kind().into() }),
        }
    }

    /// `System.arraycopy` semantics: overlapping ranges of one array copy as if through
    /// a temporary buffer, and both arrays must share an element type
    pub fn copy_range(&self, position: i32, target: &HeapObject, target_position: i32, length: i32) -> RuntimeResult<()> {
        let (HeapObject::Array { elem: from, values: source }, HeapObject::Array { elem: to, values: destination }) =
            (self, target)
        else {
            let found = if matches!(self, HeapObject::Array { .. }) { target.kind() } else { self.kind() };
            return Err(RuntimeError::TypeMismatch { expected: "array", found: found.into() });
        };
        if from != to {
            return Err(RuntimeError::TypeMismatch { expected: "arrays of one element type", found: format!("{from}[] and {to}[]") });
        }
        let copied = {
            let values = source.read();
            values[element_range(position, length, values.len())?].to_vec()
        };
        let mut values = destination.write();
        let range = element_range(target_position, length, values.len())?;
        values[range].clone_from_slice(&copied);
        Ok(())
    }

    /// Shallow copy of an array
    pub fn duplicate(&self) -> RuntimeResult<Arc<Self>> {
        match self {
            HeapObject::Array { elem, values } => {
                Ok(Arc::new(HeapObject::Array { elem: elem.clone(), values: RwLock::new(values.read().clone()) }))
            }
            other => Err(RuntimeError::TypeMismatch { expected: "array", found: other.kind().into() }),
        }
    }

    pub fn get_field(&self, name: &str, ty: &Type) -> RuntimeResult<Value> {
        match self {
            HeapObject::Instance { fields, .. } => {
                Ok(fields.lock().get(name).cloned().unwrap_or_else(|| Value::default_for(ty)))
            }
            other => Err(RuntimeError::TypeMismatch { expected: "instance", found: other.kind().into() }),
        }
    }

    pub fn put_field(&self, name: &str, ty: &Type, value: Value) -> RuntimeResult<()> {
        match self {
            HeapObject::Instance { fields, .. } => {
                fields.lock().insert(name.to_string(), value.narrowed(ty));
                Ok(())
            }
            other => Err(RuntimeError::TypeMismatch { expected: "instance", found: other.kind().into() }),
        }
    }

    pub fn char_at(&self, index: i32) -> RuntimeResult<char> {
        match self {
            HeapObject::Str(chars) => usize::try_from(index)
                .ok()
                .and_then(|i| chars.get(i))
                .copied()
                .ok_or(RuntimeError::IndexOutOfBounds { index: i64::from(index), length: chars.len() }),
            other => Err(RuntimeError::TypeMismatch { expected: "string", found: other.kind().into() }),
        }
    }
}

fn element_index(index: i32, length: usize) -> RuntimeResult<usize> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < length)
        .ok_or(RuntimeError::IndexOutOfBounds { index: i64::from(index), length })
}

fn element_range(start: i32, length: i32, size: usize) -> RuntimeResult<Range<usize>> {
    let out_of_bounds = || RuntimeError::IndexOutOfBounds { index: i64::from(start) + i64::from(length), length: size };
    let start = usize::try_from(start).map_err(|_| out_of_bounds())?;
    let count = usize::try_from(length).map_err(|_| out_of_bounds())?;
    let end = start.checked_add(count).filter(|end| *end <= size).ok_or_else(out_of_bounds)?;
    Ok(start..end)
}

impl fmt::Debug for HeapObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapObject::Array { elem, values } => write!(f, "{elem}[{}]", values.read().len()),
            HeapObject::Str(chars) => write!(f, "{:?}", chars.iter().collect::<String>()),
            HeapObject::Instance { class, .. } => write!(f, "{class}@{:p}", self),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    Ref(Arc<HeapObject>),
    /// Provenance point pushed by a hook
    Point(TrackerPoint),
    /// Call record pushed by a hook
    Invocation(Arc<Invocation>),
}

impl Value {
    pub fn default_for(ty: &Type) -> Self {
        match ty {
            Type::Long => Value::Long(0),
            Type::Float => Value::Float(0.0),
            Type::Double => Value::Double(0.0),
            Type::Object(_) | Type::Array(_) | Type::Void => Value::Null,
            _ => Value::Int(0),
        }
    }

    pub fn point(point: Option<TrackerPoint>) -> Self {
        point.map_or(Value::Null, Value::Point)
    }

    pub fn describe(&self) -> String {
        match self {
            Value::Int(_) => "int".into(),
            Value::Long(_) => "long".into(),
            Value::Float(_) => "float".into(),
            Value::Double(_) => "double".into(),
            Value::Null => "null".into(),
            Value::Ref(object) => object.kind().into(),
            Value::Point(_) => "point".into(),
            Value::Invocation(_) => "invocation".into(),
        }
    }

    fn mismatch(&self, expected: &'static str) -> RuntimeError {
        RuntimeError::TypeMismatch { expected, found: self.describe() }
    }

    pub fn as_int(&self) -> RuntimeResult<i32> {
        match self {
            Value::Int(value) => Ok(*value),
            other => Err(other.mismatch("int")),
        }
    }

    pub fn as_long(&self) -> RuntimeResult<i64> {
        match self {
            Value::Long(value) => Ok(*value),
            other => Err(other.mismatch("long")),
        }
    }

    pub fn as_float(&self) -> RuntimeResult<f32> {
        match self {
            Value::Float(value) => Ok(*value),
            other => Err(other.mismatch("float")),
        }
    }

    pub fn as_double(&self) -> RuntimeResult<f64> {
        match self {
            Value::Double(value) => Ok(*value),
            other => Err(other.mismatch("double")),
        }
    }

    /// The referenced object; `None` for null
    pub fn reference(&self) -> RuntimeResult<Option<&Arc<HeapObject>>> {
        match self {
            Value::Ref(object) => Ok(Some(object)),
            Value::Null => Ok(None),
            other => Err(other.mismatch("reference")),
        }
    }

    /// The referenced object; null is an error
    pub fn as_object(&self, context: &str) -> RuntimeResult<&Arc<HeapObject>> {
        self.reference()?.ok_or_else(|| RuntimeError::NullReference(context.to_string()))
    }

    pub fn as_point(&self) -> RuntimeResult<Option<&TrackerPoint>> {
        match self {
            Value::Point(point) => Ok(Some(point)),
            Value::Null => Ok(None),
            other => Err(other.mismatch("point")),
        }
    }

    pub fn as_invocation(&self) -> RuntimeResult<Option<&Arc<Invocation>>> {
        match self {
            Value::Invocation(invocation) => Ok(Some(invocation)),
            Value::Null => Ok(None),
            other => Err(other.mismatch("invocation")),
        }
    }

    /// Truncates an int to a narrower integral type; other values pass unchanged
    pub fn narrowed(self, ty: &Type) -> Value {
        let Value::Int(value) = self else {
            return self;
        };
        Value::Int(match ty {
            Type::Byte => i32::from(value as i8),
            Type::Char => i32::from(value as u16),
            Type::Short => i32::from(value as i16),
            Type::Boolean => value & 1,
            _ => value,
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Reference identity; two nulls are identical
    pub fn same_ref(&self, other: &Value) -> RuntimeResult<bool> {
        Ok(match (self.reference()?, other.reference()?) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        })
    }

    /// Text form used by string concatenation, given the operand's static type
    pub fn render(&self, ty: &Type) -> String {
        match (self, ty) {
            (Value::Int(code), Type::Char) => char::from_u32(*code as u32).unwrap_or(char::REPLACEMENT_CHARACTER).to_string(),
            (Value::Int(flag), Type::Boolean) => (*flag != 0).to_string(),
            (Value::Int(value), _) => value.to_string(),
            (Value::Long(value), _) => value.to_string(),
            (Value::Float(value), _) => value.to_string(),
            (Value::Double(value), _) => value.to_string(),
            (Value::Null, _) => "null".to_string(),
            (Value::Ref(object), _) => object.text().unwrap_or_else(|| format!("{object:?}")),
            (Value::Point(point), _) => format!("{point:?}"),
            (Value::Invocation(invocation), _) => invocation.signature_str().to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Ref(object) => match &**object {
                HeapObject::Str(_) => write!(f, "{:?}", object.text().unwrap_or_default()),
                _ => write!(f, "{object:?}"),
            },
            other => f.write_str(&other.render(&Type::Int)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_array_text() {
        let array = HeapObject::char_array("abc");
        assert_eq!(array.text().as_deref(), Some("abc"));
        assert_eq!(array.length().unwrap(), 3);
    }

    #[test]
    fn test_identity() {
        let a = Value::Ref(HeapObject::string("x"));
        let b = Value::Ref(HeapObject::string("x"));
        assert!(a.same_ref(&a.clone()).unwrap());
        assert!(!a.same_ref(&b).unwrap());
        assert!(Value::Null.same_ref(&Value::Null).unwrap());
        assert!(Value::Int(1).same_ref(&Value::Null).is_err());
    }

    #[test]
    fn test_render() {
        assert_eq!(Value::Int('q' as i32).render(&Type::Char), "q");
        assert_eq!(Value::Int(1).render(&Type::Boolean), "true");
        assert_eq!(Value::Ref(HeapObject::string("hi")).render(&Type::string()), "hi");
        assert_eq!(Value::Null.render(&Type::string()), "null");
    }

    #[test]
    fn test_string_char_at_bounds() {
        let text = HeapObject::string("ab");
        assert_eq!(text.char_at(1).unwrap(), 'b');
        assert_eq!(text.char_at(2).err(), Some(RuntimeError::IndexOutOfBounds { index: 2, length: 2 }));
    }

    #[test]
    fn test_copy_range() {
        let source = HeapObject::char_array("abcd");
        let target = HeapObject::new_array(Type::Char, 3);
        source.copy_range(1, &target, 0, 3).unwrap();
        assert_eq!(target.text().as_deref(), Some("bcd"));

        // overlapping copy within one array
        source.copy_range(0, &source, 1, 3).unwrap();
        assert_eq!(source.text().as_deref(), Some("aabc"));
    }

    #[test]
    fn test_copy_range_checks_bounds_and_types() {
        let source = HeapObject::char_array("ab");
        let target = HeapObject::new_array(Type::Char, 2);
        assert_eq!(
            source.copy_range(1, &target, 0, 2).err(),
            Some(RuntimeError::IndexOutOfBounds { index: 3, length: 2 })
        );
        assert!(source.copy_range(0, &target, 0, -1).is_err());
        let bytes = HeapObject::new_array(Type::Byte, 2);
        assert!(matches!(source.copy_range(0, &bytes, 0, 1), Err(RuntimeError::TypeMismatch { .. })));
        assert_eq!(target.text().as_deref(), Some("\0\0"));
    }

    #[test]
    fn test_duplicate_is_a_new_array() {
        let array = HeapObject::char_array("hi");
        let copy = array.duplicate().unwrap();
        assert!(!Arc::ptr_eq(&array, &copy));
        assert_eq!(copy.text().as_deref(), Some("hi"));
        assert!(HeapObject::string("hi").duplicate().is_err());
    }
}
