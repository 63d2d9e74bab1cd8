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

//! What the analysis knows about one produced value

use super::merge::MergeSlot;
use crate::ir::Type;

/// Abstract value held by a frame slot
///
/// Values that carry an instruction index are identified by it, so the result of one
/// instruction compares equal across solver passes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlowValue {
    /// Nothing known about its provenance; the type is kept when there is one
    Untrackable(Option<Type>),
    /// Integer literal pushed by `insn`
    Constant { ty: Type, insn: usize, value: i64 },
    /// Element read out of an array (or a string) by `insn`
    ArrayElementLoad { ty: Type, insn: usize },
    /// Field read by `insn`
    FieldLoad { ty: Type, insn: usize, field_id: String },
    /// Result of an instrumented call at `insn`
    CallReturn { ty: Type, insn: usize },
    /// Parameter whose point arrives through the call record
    CallArgument { ty: Type, arg: u8 },
    /// Numeric conversion at `insn` that keeps the provenance of `target`
    Cast { ty: Type, insn: usize, target: Box<FlowValue> },
    /// Same value as `original`, moved through a local or duplicated at `insn`
    Copy { insn: usize, original: Box<FlowValue> },
    /// Values meeting at a control-flow join
    Merged { ty: Type, slot: MergeSlot },
}

impl FlowValue {
    pub fn untrackable(ty: Type) -> Self {
        FlowValue::Untrackable(Some(ty))
    }

    pub fn copy(insn: usize, original: &FlowValue) -> Self {
        match original {
            // nothing to follow through an untrackable value
            FlowValue::Untrackable(_) => original.clone(),
            _ => FlowValue::Copy { insn, original: Box::new(original.clone()) },
        }
    }

    pub fn ty(&self) -> Option<&Type> {
        match self {
            FlowValue::Untrackable(ty) => ty.as_ref(),
            FlowValue::Constant { ty, .. }
            | FlowValue::ArrayElementLoad { ty, .. }
            | FlowValue::FieldLoad { ty, .. }
            | FlowValue::CallReturn { ty, .. }
            | FlowValue::CallArgument { ty, .. }
            | FlowValue::Cast { ty, .. }
            | FlowValue::Merged { ty, .. } => Some(ty),
            FlowValue::Copy { original, .. } => original.ty(),
        }
    }

    /// Instruction after which the value exists, if it has a single one
    pub fn creation_insn(&self) -> Option<usize> {
        match self {
            FlowValue::Constant { insn, .. }
            | FlowValue::ArrayElementLoad { insn, .. }
            | FlowValue::FieldLoad { insn, .. }
            | FlowValue::CallReturn { insn, .. }
            | FlowValue::Cast { insn, .. }
            | FlowValue::Copy { insn, .. } => Some(*insn),
            FlowValue::Merged { slot, .. } => Some(slot.insn),
            FlowValue::Untrackable(_) | FlowValue::CallArgument { .. } => None,
        }
    }

    /// Trackability as far as a single value can tell; merges are decided later
    pub fn may_be_trackable(&self) -> bool {
        match self {
            FlowValue::Untrackable(_) => false,
            FlowValue::Cast { target, .. } => target.may_be_trackable(),
            FlowValue::Copy { original, .. } => original.may_be_trackable(),
            _ => true,
        }
    }

    /// Follows copies to the value that was copied
    pub fn unwrap_copies(&self) -> &FlowValue {
        match self {
            FlowValue::Copy { original, .. } => original.unwrap_copies(),
            other => other,
        }
    }

    pub fn constant_value(&self) -> Option<i64> {
        match self.unwrap_copies() {
            FlowValue::Constant { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn is_string(&self) -> bool {
        self.ty().is_some_and(Type::is_string)
    }

    /// Same value with a different type, as seen through a transparent conversion
    pub fn retyped(&self, to: &Type) -> FlowValue {
        match self {
            FlowValue::Untrackable(_) => FlowValue::untrackable(to.clone()),
            FlowValue::Constant { insn, value, .. } => FlowValue::Constant { ty: to.clone(), insn: *insn, value: *value },
            FlowValue::ArrayElementLoad { insn, .. } => FlowValue::ArrayElementLoad { ty: to.clone(), insn: *insn },
            FlowValue::FieldLoad { insn, field_id, .. } => {
                FlowValue::FieldLoad { ty: to.clone(), insn: *insn, field_id: field_id.clone() }
            }
            FlowValue::CallReturn { insn, .. } => FlowValue::CallReturn { ty: to.clone(), insn: *insn },
            FlowValue::CallArgument { arg, .. } => FlowValue::CallArgument { ty: to.clone(), arg: *arg },
            FlowValue::Cast { insn, target, .. } => FlowValue::Cast { ty: to.clone(), insn: *insn, target: target.clone() },
            FlowValue::Copy { insn, original } => FlowValue::Copy { insn: *insn, original: Box::new(original.retyped(to)) },
            FlowValue::Merged { slot, .. } => FlowValue::Merged { ty: to.clone(), slot: *slot },
        }
    }
}

/// Common type of two slots meeting at a join
pub fn merge_types(a: Option<&Type>, b: Option<&Type>) -> Option<Type> {
    let (a, b) = (a?, b?);
    if a == b {
        return Some(a.clone());
    }
    if a.is_reference() && b.is_reference() {
        if a.is_null() {
            return Some(b.clone());
        }
        if b.is_null() {
            return Some(a.clone());
        }
        return Some(Type::Object(crate::ir::types::OBJECT_CLASS.to_string()));
    }
    let int_like = |ty: &Type| matches!(ty, Type::Boolean | Type::Byte | Type::Char | Type::Short | Type::Int);
    if int_like(a) && int_like(b) {
        return Some(Type::Int);
    }
    None
}
