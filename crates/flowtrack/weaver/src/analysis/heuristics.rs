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

//! Which calls, arguments and fields carry provenance
//!
//! Calls are matched by name and descriptor only: a method returning `byte` or `char`,
//! or an `int` from something that reads or decodes, is assumed to hand out one unit of
//! data whose origin is worth following.

use crate::ir::types::STRING_CLASS;
use crate::ir::{FieldRef, MethodDesc, MethodRef, Type};
use flowtrack_core::MAX_ARG_SLOTS;

pub const SYSTEM_CLASS: &str = "java/lang/System";

const ARRAY_COPY_DESC: &str = "(Ljava/lang/Object;ILjava/lang/Object;II)V";

/// Highest argument index that gets a slot in the call record
pub const MAX_ARG_NUM_TO_INSTRUMENT: usize = MAX_ARG_SLOTS - 1;

/// Whether a call's result travels back through a call record
pub fn should_instrument_invocation(owner: &str, name: &str, desc: &MethodDesc) -> bool {
    match desc.ret {
        Type::Byte | Type::Char => {
            !(name == "coder" || name == "getCoder" || (owner == STRING_CLASS && name == "charAt"))
        }
        Type::Int => {
            ((name.contains("read") || name.contains("Read")) && !desc.mentions_buffer())
                || name.starts_with("decode")
                || name.contains("codePoint")
                || name.contains("CodePoint")
        }
        _ => false,
    }
}

/// Which arguments of a call get their point recorded, or `None` if none do
pub fn args_to_instrument(name: &str, desc: &MethodDesc) -> Option<Vec<bool>> {
    if name == "<init>" || desc.params.len() > MAX_ARG_SLOTS {
        return None;
    }
    let eager = name.contains("write") || name.contains("Write") || name.contains("print") || name.starts_with("encode");
    let args: Vec<bool> = desc
        .params
        .iter()
        .enumerate()
        .map(|(index, ty)| {
            index <= MAX_ARG_NUM_TO_INSTRUMENT
                && (matches!(ty, Type::Byte | Type::Char | Type::Short) || (eager && *ty == Type::Int))
        })
        .collect();
    args.iter().any(|a| *a).then_some(args)
}

pub fn args_to_instrument_for(method: &MethodRef) -> Option<Vec<bool>> {
    args_to_instrument(&method.name, &method.desc)
}

/// Calls whose result is the same unit of data as their first argument
pub fn is_pass_through(method: &MethodRef) -> bool {
    method.owner == "java/lang/Byte" && method.name == "toUnsignedInt" && method.desc.descriptor() == "(B)I"
}

/// `System.arraycopy`
pub fn is_array_copy(method: &MethodRef) -> bool {
    method.owner == SYSTEM_CLASS && method.name == "arraycopy" && method.desc.descriptor() == ARRAY_COPY_DESC
}

/// Array type of a `clone()` on a `char[]`, `byte[]` or `int[]`
pub fn cloned_array(method: &MethodRef) -> Option<Type> {
    if method.name != "clone" || !method.desc.params.is_empty() || !method.owner.starts_with('[') {
        return None;
    }
    match Type::parse(&method.owner).ok()? {
        Type::Array(element) if element.is_tracked_element() => Some(Type::Array(element)),
        _ => None,
    }
}

/// Identity comparisons inside the core library keep their meaning
pub fn keeps_identity_comparisons(owner: &str) -> bool {
    owner.starts_with("java/lang/")
}

/// `String.charAt`: reads one element out of a string
pub fn is_char_at(method: &MethodRef) -> bool {
    method.owner == STRING_CLASS && method.name == "charAt" && method.desc.descriptor() == "(I)C"
}

/// Fields whose loads are tracked
pub fn should_track_field(field: &FieldRef) -> bool {
    field.ty.is_tracked_scalar() && !(field.owner == STRING_CLASS && field.name == "coder")
}
