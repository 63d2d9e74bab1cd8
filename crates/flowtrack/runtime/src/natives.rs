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

//! Methods implemented in Rust and callable from executed code
//!
//! A native stands in for library code that is never woven, typically the origin or
//! destination of tracked data. It sees the call record its caller handed over, so it
//! can read argument points and publish the point of its result.

use crate::error::{RuntimeError, RuntimeResult};
use crate::hooks::HookContext;
use crate::value::{HeapObject, Value};
use flowtrack_core::{Invocation, TrackerPoint};
use std::collections::HashMap;
use std::sync::Arc;

pub type NativeFn = Arc<dyn Fn(&mut NativeCall<'_>) -> RuntimeResult<Option<Value>> + Send + Sync>;

/// Arguments and call record of one native call; the receiver, if any, comes first
pub struct NativeCall<'a> {
    pub method: &'a str,
    pub args: Vec<Value>,
    pub invocation: Option<Arc<Invocation>>,
    pub hooks: &'a HookContext,
}

impl NativeCall<'_> {
    pub fn arg(&self, index: usize) -> RuntimeResult<&Value> {
        self.args.get(index).ok_or_else(|| RuntimeError::Native {
            method: self.method.to_string(),
            reason: format!("missing argument {index}"),
        })
    }

    /// Point the caller recorded for parameter `slot` (receiver not counted)
    pub fn arg_point(&self, slot: usize) -> Option<TrackerPoint> {
        self.invocation.as_ref().and_then(|invocation| invocation.arg_point(slot))
    }

    /// Publishes the point of the returned value to the caller
    pub fn returning(&self, point: Option<TrackerPoint>) {
        if let Some(invocation) = &self.invocation {
            invocation.returning(point);
        }
    }

    fn receiver(&self) -> RuntimeResult<&Arc<HeapObject>> {
        self.arg(0)?.as_object(self.method)
    }
}

#[derive(Clone, Default)]
pub struct NativeRegistry {
    methods: HashMap<String, NativeFn>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the string and byte helpers executed code relies on
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("java/lang/String", "charAt", "(I)C", |call| {
            let index = call.arg(1)?.as_int()?;
            let c = call.receiver()?.char_at(index)?;
            Ok(Some(Value::Int(c as i32)))
        });
        registry.register("java/lang/String", "length", "()I", |call| {
            let length = call.receiver()?.length()?;
            Ok(Some(Value::Int(i32::try_from(length).unwrap_or(i32::MAX))))
        });
        registry.register("java/lang/String", "equals", "(Ljava/lang/Object;)Z", |call| {
            let equal = crate::hooks::string_equals(call.arg(0)?, call.arg(1)?)?;
            Ok(Some(Value::Int(i32::from(equal))))
        });
        registry.register("java/lang/Byte", "toUnsignedInt", "(B)I", |call| {
            let value = call.arg(0)?.as_int()?;
            Ok(Some(Value::Int(value & 0xff)))
        });
        registry.register("java/lang/System", "arraycopy", "(Ljava/lang/Object;ILjava/lang/Object;II)V", |call| {
            let source = call.arg(0)?.as_object(call.method)?;
            let target = call.arg(2)?.as_object(call.method)?;
            source.copy_range(call.arg(1)?.as_int()?, target, call.arg(3)?.as_int()?, call.arg(4)?.as_int()?)?;
            Ok(None)
        });
        for owner in ["[B", "[C", "[I"] {
            registry.register(owner, "clone", "()Ljava/lang/Object;", |call| {
                Ok(Some(Value::Ref(call.receiver()?.duplicate()?)))
            });
        }
        registry
    }

    pub fn key(owner: &str, name: &str, desc: &str) -> String {
        format!("{owner}.{name}{desc}")
    }

    pub fn register<F>(&mut self, owner: &str, name: &str, desc: &str, method: F)
    where
        F: Fn(&mut NativeCall<'_>) -> RuntimeResult<Option<Value>> + Send + Sync + 'static,
    {
        self.methods.insert(Self::key(owner, name, desc), Arc::new(method));
    }

    pub fn get(&self, owner: &str, name: &str, desc: &str) -> Option<NativeFn> {
        self.methods.get(&Self::key(owner, name, desc)).cloned()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowtrack_weaver::ir::Type;

    fn call<'a>(hooks: &'a HookContext, args: Vec<Value>) -> NativeCall<'a> {
        NativeCall { method: "test", args, invocation: None, hooks }
    }

    #[test]
    fn test_builtins() {
        let natives = NativeRegistry::with_builtins();
        let hooks = HookContext::global();
        let text = Value::Ref(HeapObject::string("hey"));

        let char_at = natives.get("java/lang/String", "charAt", "(I)C").unwrap();
        let result = char_at(&mut call(&hooks, vec![text.clone(), Value::Int(1)])).unwrap();
        assert_eq!(result.unwrap().as_int().unwrap(), 'e' as i32);

        let length = natives.get("java/lang/String", "length", "()I").unwrap();
        let result = length(&mut call(&hooks, vec![text])).unwrap();
        assert_eq!(result.unwrap().as_int().unwrap(), 3);

        let unsigned = natives.get("java/lang/Byte", "toUnsignedInt", "(B)I").unwrap();
        let result = unsigned(&mut call(&hooks, vec![Value::Int(-1)])).unwrap();
        assert_eq!(result.unwrap().as_int().unwrap(), 255);
    }

    #[test]
    fn test_bulk_array_builtins() {
        let natives = NativeRegistry::with_builtins();
        let hooks = HookContext::global();
        let source = HeapObject::char_array("xyz");
        let target = HeapObject::new_array(Type::Char, 2);

        let copy = natives.get("java/lang/System", "arraycopy", "(Ljava/lang/Object;ILjava/lang/Object;II)V").unwrap();
        let args = vec![Value::Ref(source.clone()), Value::Int(1), Value::Ref(target.clone()), Value::Int(0), Value::Int(2)];
        assert!(copy(&mut call(&hooks, args)).unwrap().is_none());
        assert_eq!(target.text().as_deref(), Some("yz"));

        let clone = natives.get("[C", "clone", "()Ljava/lang/Object;").unwrap();
        let result = clone(&mut call(&hooks, vec![Value::Ref(source.clone())])).unwrap().unwrap();
        assert!(!Arc::ptr_eq(result.as_object("clone").unwrap(), &source));
        assert!(natives.get("[J", "clone", "()Ljava/lang/Object;").is_none());
    }

    #[test]
    fn test_missing_argument_is_reported() {
        let natives = NativeRegistry::with_builtins();
        let hooks = HookContext::global();
        let length = natives.get("java/lang/String", "length", "()I").unwrap();
        let error = length(&mut call(&hooks, Vec::new())).err().unwrap();
        assert!(matches!(error, RuntimeError::Native { .. }));
    }

    #[test]
    fn test_unknown_native() {
        assert!(NativeRegistry::new().get("demo/In", "next", "()C").is_none());
        assert!(NativeRegistry::new().is_empty());
    }
}
