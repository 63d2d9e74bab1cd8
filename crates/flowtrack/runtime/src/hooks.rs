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

//! Execution of the hooks woven into instrumented code
//!
//! A hook never makes the program fail because of provenance bookkeeping: a tracking
//! error is logged and the affected point becomes unknown. Errors of the program
//! itself, such as storing past the end of an array, still propagate.

use crate::error::{RuntimeError, RuntimeResult};
use crate::value::{HeapObject, Value};
use flowtrack_core::{
    ConstantRegistry, FieldRepository, Invocation, Tracker, TrackerPoint, TrackerRepository, TrackerResult, context,
};
use flowtrack_weaver::ir::{Hook, Type};
use std::sync::Arc;
use tracing::{trace, warn};

#[derive(Clone)]
pub struct HookContext {
    repository: Arc<TrackerRepository>,
    fields: Arc<FieldRepository>,
    constants: Arc<ConstantRegistry>,
}

impl HookContext {
    pub fn new(repository: Arc<TrackerRepository>, fields: Arc<FieldRepository>, constants: Arc<ConstantRegistry>) -> Self {
        Self { repository, fields, constants }
    }

    /// Context over the process-wide repositories
    pub fn global() -> Self {
        Self::new(TrackerRepository::global(), FieldRepository::global(), ConstantRegistry::global())
    }

    pub fn repository(&self) -> &Arc<TrackerRepository> {
        &self.repository
    }

    pub fn fields(&self) -> &Arc<FieldRepository> {
        &self.fields
    }

    pub fn constants(&self) -> &Arc<ConstantRegistry> {
        &self.constants
    }

    /// Provenance of `object[index]`
    pub fn element_point(&self, object: &Value, index: i32) -> RuntimeResult<Option<TrackerPoint>> {
        let (Some(object), Ok(index)) = (object.reference()?, usize::try_from(index)) else {
            return Ok(None);
        };
        Ok(self.repository.point(object, index))
    }

    pub fn execute(&self, hook: &Hook, stack: &mut Vec<Value>) -> RuntimeResult<()> {
        trace!(%hook, "hook");
        match hook {
            Hook::ConstantPoint(constant) => {
                let point = if context::is_active() {
                    self.constants
                        .point(constant.class_id, constant.offset, constant.length)
                        .map_err(|error| warn!(%error, "constant point unavailable"))
                        .ok()
                } else {
                    None
                };
                stack.push(Value::point(point));
            }
            Hook::ElementPoint => {
                let index = pop(stack)?.as_int()?;
                let object = pop(stack)?;
                let point = self.element_point(&object, index)?;
                stack.push(Value::point(point));
            }
            Hook::ArrayStoreWithPoint(_) => {
                let point = pop(stack)?;
                let value = pop(stack)?;
                let index = pop(stack)?.as_int()?;
                let array = pop(stack)?;
                let array = array.as_object("array store")?;
                array.store(index, value)?;
                let point = point.as_point()?;
                let slot = usize::try_from(index).unwrap_or_default();
                if let Err(error) = self.repository.set_source(
                    array,
                    slot,
                    1,
                    point.map(TrackerPoint::tracker),
                    point.map_or(0, TrackerPoint::index),
                ) {
                    warn!(%error, index, "could not record element provenance");
                }
            }
            Hook::FieldPoint(field_id) => {
                let target = pop(stack)?;
                let point = target.reference()?.and_then(|object| self.fields.get_point(object, field_id));
                stack.push(Value::point(point));
            }
            Hook::SetFieldPoint(field_id) => {
                let point = pop(stack)?;
                let target = pop(stack)?;
                if let Some(object) = target.reference()? {
                    self.fields.set_point(object, field_id, point.as_point()?.cloned());
                }
            }
            Hook::InvocationCreate(signature) => {
                let invocation = context::is_active().then(|| Invocation::create(signature.as_str()));
                stack.push(invocation.map_or(Value::Null, Value::Invocation));
            }
            Hook::InvocationSetArg(slot) => {
                let point = pop(stack)?;
                let invocation = pop(stack)?;
                if let Some(record) = invocation.as_invocation()? {
                    if let Err(error) = record.set_arg(usize::from(*slot), point.as_point()?.cloned()) {
                        warn!(%error, "argument point dropped");
                    }
                }
                stack.push(invocation);
            }
            Hook::InvocationCalling => {
                let invocation = pop(stack)?;
                if let Some(record) = invocation.as_invocation()? {
                    record.calling();
                }
                stack.push(invocation);
            }
            Hook::InvocationStart(signature) => {
                let invocation = Invocation::start(signature);
                stack.push(invocation.map_or(Value::Null, Value::Invocation));
            }
            Hook::InvocationArgPoint(slot) => {
                let invocation = pop(stack)?;
                let point = invocation.as_invocation()?.and_then(|record| record.arg_point(usize::from(*slot)));
                stack.push(Value::point(point));
            }
            Hook::InvocationReturnPoint => {
                let invocation = pop(stack)?;
                let point = invocation.as_invocation()?.and_then(|record| record.return_point());
                stack.push(Value::point(point));
            }
            Hook::InvocationReturning => {
                let point = pop(stack)?;
                let invocation = pop(stack)?;
                if let Some(record) = invocation.as_invocation()? {
                    record.returning(point.as_point()?.cloned());
                }
            }
            Hook::StringEquals => {
                let b = pop(stack)?;
                let a = pop(stack)?;
                stack.push(Value::Int(i32::from(string_equals(&a, &b)?)));
            }
            Hook::ConcatWithPoints { args, mask } => {
                let tracked = mask.chars().filter(|c| *c == 'T').count();
                let points = pop_n(stack, tracked)?;
                let values = pop_n(stack, args.len())?;
                stack.push(self.concat(args, mask, &values, &points)?);
            }
            Hook::ConstantString { class_id, offset } => {
                let literal = pop(stack)?;
                let copy = match literal.reference()? {
                    Some(object) => {
                        let text = object.text().unwrap_or_default();
                        let copy = HeapObject::string(&text);
                        match self.constants.get(*class_id) {
                            Ok(table) => {
                                if let Err(error) = self.literal_source(&copy, &text, table.tracker(), *offset) {
                                    warn!(%error, class_id, "could not record literal provenance");
                                }
                            }
                            Err(error) => warn!(%error, "literal left untracked"),
                        }
                        Value::Ref(copy)
                    }
                    None => Value::Null,
                };
                stack.push(copy);
            }
            Hook::ArrayCopy => {
                let args = pop_n(stack, 5)?;
                self.array_copy(&args)?;
            }
            Hook::ArrayClone => {
                let array = pop(stack)?;
                stack.push(self.array_clone(&array)?);
            }
        }
        Ok(())
    }

    /// `System.arraycopy`; the copied range takes over the provenance of the source range
    pub fn array_copy(&self, args: &[Value]) -> RuntimeResult<()> {
        let [source, position, target, target_position, length] = args else {
            return Err(RuntimeError::StackUnderflow { method: "hook".into(), pc: 0 });
        };
        let source = source.as_object("arraycopy source")?;
        let target = target.as_object("arraycopy target")?;
        let (position, target_position, length) = (position.as_int()?, target_position.as_int()?, length.as_int()?);
        source.copy_range(position, target, target_position, length)?;

        // the copy succeeded, so all three are in bounds and not negative
        let tracker = self.repository.get_tracker(source);
        let recorded = self.repository.set_source(
            target,
            target_position as usize,
            length as usize,
            tracker.as_ref(),
            position as usize,
        );
        if let Err(error) = recorded {
            warn!(%error, "could not record arraycopy provenance");
        }
        Ok(())
    }

    /// `clone()` of an array, with the provenance of every element
    pub fn array_clone(&self, array: &Value) -> RuntimeResult<Value> {
        let array = array.as_object("clone")?;
        let copy = array.duplicate()?;
        if let Some(tracker) = self.repository.get_tracker(array) {
            if let Err(error) = self.repository.set_source(&copy, 0, copy.length()?, Some(&tracker), 0) {
                warn!(%error, "could not record clone provenance");
            }
        }
        Ok(Value::Ref(copy))
    }

    /// Points each character of a literal copy at its encoding in the constant table.
    /// The table holds UTF-8, so past the first multi-byte character indices and offsets
    /// no longer line up and every character gets its own part.
    fn literal_source(&self, copy: &Arc<HeapObject>, text: &str, table: &Arc<Tracker>, offset: usize) -> TrackerResult<()> {
        if text.is_ascii() {
            return self.repository.set_source(copy, 0, text.len(), Some(table), offset);
        }
        for (index, (byte, _)) in text.char_indices().enumerate() {
            self.repository.set_source(copy, index, 1, Some(table), offset + byte)?;
        }
        Ok(())
    }

    /// Builds the concatenation and records where each of its characters came from:
    /// char operands from their points, string operands from their own trackers
    pub fn concat(&self, args: &[Type], mask: &str, values: &[Value], points: &[Value]) -> RuntimeResult<Value> {
        let mut text = String::new();
        let mut sources = Vec::new();
        let mut points = points.iter();
        for ((ty, value), flag) in args.iter().zip(values).zip(mask.chars()) {
            let start = text.chars().count();
            let rendered = value.render(ty);
            let length = rendered.chars().count();
            text.push_str(&rendered);
            if flag == 'T' {
                if let Some(point) = points.next().map(Value::as_point).transpose()?.flatten() {
                    sources.push((start, length, Some(point.tracker().clone()), point.index()));
                }
            } else if let Value::Ref(object) = value {
                if let Some(tracker) = self.repository.get_tracker(object) {
                    sources.push((start, length, Some(tracker), 0));
                }
            }
        }
        let result = HeapObject::string(&text);
        for (start, length, source, source_index) in sources {
            if let Err(error) = self.repository.set_source(&result, start, length, source.as_ref(), source_index) {
                warn!(%error, "could not record concatenation provenance");
            }
        }
        Ok(Value::Ref(result))
    }
}

/// Content equality for strings, identity for anything else; two nulls are equal
pub fn string_equals(a: &Value, b: &Value) -> RuntimeResult<bool> {
    match (a.reference()?, b.reference()?) {
        (Some(x), Some(y)) => match (&**x, &**y) {
            (HeapObject::Str(left), HeapObject::Str(right)) => Ok(left == right),
            _ => Ok(Arc::ptr_eq(x, y)),
        },
        (None, None) => Ok(true),
        _ => Ok(false),
    }
}

pub(crate) fn pop(stack: &mut Vec<Value>) -> RuntimeResult<Value> {
    stack.pop().ok_or(RuntimeError::StackUnderflow { method: "hook".into(), pc: 0 })
}

/// Pops `count` values, bottom first
pub(crate) fn pop_n(stack: &mut Vec<Value>, count: usize) -> RuntimeResult<Vec<Value>> {
    let start = stack
        .len()
        .checked_sub(count)
        .ok_or(RuntimeError::StackUnderflow { method: "hook".into(), pc: 0 })?;
    Ok(stack.split_off(start))
}
