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

//! Instructions of the stack machine
//!
//! Operands live on an operand stack and in numbered locals; every value, wide or
//! not, occupies one slot. Control flow uses [`Insn::Label`] pseudo-instructions as
//! jump targets. [`Hook`] instructions only appear in woven code: they are the calls
//! into the provenance runtime.

use super::types::{MethodDesc, Type};
use flowtrack_core::{ClassConstant, FieldRepository, Invocation};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type LabelId = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    Str(String),
}

impl Constant {
    pub fn ty(&self) -> Type {
        match self {
            Constant::Int(_) => Type::Int,
            Constant::Long(_) => Type::Long,
            Constant::Float(_) => Type::Float,
            Constant::Double(_) => Type::Double,
            Constant::Null => Type::Object(super::types::NULL_CLASS.to_string()),
            Constant::Str(_) => Type::string(),
        }
    }

    /// Integral value usable as a tracked literal
    pub fn integral(&self) -> Option<i64> {
        match self {
            Constant::Int(value) => Some(i64::from(*value)),
            Constant::Long(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(value) => write!(f, "{value}"),
            Constant::Long(value) => write!(f, "{value}L"),
            Constant::Float(value) => write!(f, "{value}f"),
            Constant::Double(value) => write!(f, "{value}d"),
            Constant::Null => f.write_str("null"),
            Constant::Str(value) => write!(f, "{value:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Cond {
    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Cond::Eq => ordering == Equal,
            Cond::Ne => ordering != Equal,
            Cond::Lt => ordering == Less,
            Cond::Ge => ordering != Less,
            Cond::Gt => ordering == Greater,
            Cond::Le => ordering != Greater,
        }
    }

    pub fn negate(self) -> Self {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Ge => Cond::Lt,
            Cond::Gt => Cond::Le,
            Cond::Le => Cond::Gt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub ty: Type,
}

impl FieldRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, ty: Type) -> Self {
        Self { owner: owner.into(), name: name.into(), ty }
    }

    pub fn field_id(&self) -> String {
        FieldRepository::field_id(&self.owner, &self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeKind {
    Static,
    Virtual,
    Special,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub kind: InvokeKind,
    pub owner: String,
    pub name: String,
    pub desc: MethodDesc,
}

impl MethodRef {
    pub fn new(kind: InvokeKind, owner: impl Into<String>, name: impl Into<String>, desc: MethodDesc) -> Self {
        Self { kind, owner: owner.into(), name: name.into(), desc }
    }

    pub fn signature(&self) -> String {
        Invocation::signature(&self.name, &self.desc.descriptor())
    }

    pub fn has_receiver(&self) -> bool {
        self.kind != InvokeKind::Static
    }

    /// Operands popped by the call, receiver included
    pub fn operand_count(&self) -> usize {
        self.desc.params.len() + usize::from(self.has_receiver())
    }
}

/// Calls into the provenance runtime, inserted by the weaver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    /// `[] -> [point]`
    ConstantPoint(ClassConstant),
    /// `[object, index] -> [point]`, for array elements and `String.charAt`
    ElementPoint,
    /// `[array, index, value, point] -> []`
    ArrayStoreWithPoint(Type),
    /// `[target] -> [point]`
    FieldPoint(String),
    /// `[target, point] -> []`
    SetFieldPoint(String),
    /// `[] -> [invocation]`
    InvocationCreate(String),
    /// `[invocation, point] -> [invocation]`
    InvocationSetArg(u8),
    /// `[invocation] -> [invocation]`
    InvocationCalling,
    /// `[] -> [invocation or null]`
    InvocationStart(String),
    /// `[invocation] -> [point]`
    InvocationArgPoint(u8),
    /// `[invocation] -> [point]`
    InvocationReturnPoint,
    /// `[invocation, point] -> []`
    InvocationReturning,
    /// `[a, b] -> [int]`
    StringEquals,
    /// `[args.., points..] -> [string]`; `mask` has a `T` for every argument with a point
    ConcatWithPoints { args: Vec<Type>, mask: String },
    /// `[string] -> [string]`
    ConstantString { class_id: u32, offset: usize },
    /// `[source, source_pos, target, target_pos, length] -> []`, replaces `System.arraycopy`
    ArrayCopy,
    /// `[array] -> [array]`, replaces `clone()` on a primitive array
    ArrayClone,
}

impl Hook {
    pub fn stack_effect(&self) -> (usize, usize) {
        match self {
            Hook::ConstantPoint(_) | Hook::InvocationCreate(_) | Hook::InvocationStart(_) => (0, 1),
            Hook::ElementPoint => (2, 1),
            Hook::ArrayStoreWithPoint(_) => (4, 0),
            Hook::FieldPoint(_) => (1, 1),
            Hook::SetFieldPoint(_) => (2, 0),
            Hook::InvocationSetArg(_) => (2, 1),
            Hook::InvocationCalling => (1, 1),
            Hook::InvocationArgPoint(_) | Hook::InvocationReturnPoint => (1, 1),
            Hook::InvocationReturning => (2, 0),
            Hook::StringEquals => (2, 1),
            Hook::ConcatWithPoints { args, mask } => {
                (args.len() + mask.chars().filter(|c| *c == 'T').count(), 1)
            }
            Hook::ConstantString { .. } | Hook::ArrayClone => (1, 1),
            Hook::ArrayCopy => (5, 0),
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::ConstantPoint(c) => write!(f, "constant_point {} {} {}", c.class_id, c.offset, c.length),
            Hook::ElementPoint => f.write_str("element_point"),
            Hook::ArrayStoreWithPoint(ty) => write!(f, "array_store_with_point {ty}"),
            Hook::FieldPoint(id) => write!(f, "field_point \"{id}\""),
            Hook::SetFieldPoint(id) => write!(f, "set_field_point \"{id}\""),
            Hook::InvocationCreate(sig) => write!(f, "invocation_create \"{sig}\""),
            Hook::InvocationSetArg(n) => write!(f, "invocation_set_arg {n}"),
            Hook::InvocationCalling => f.write_str("invocation_calling"),
            Hook::InvocationStart(sig) => write!(f, "invocation_start \"{sig}\""),
            Hook::InvocationArgPoint(n) => write!(f, "invocation_arg_point {n}"),
            Hook::InvocationReturnPoint => f.write_str("invocation_return_point"),
            Hook::InvocationReturning => f.write_str("invocation_returning"),
            Hook::StringEquals => f.write_str("string_equals"),
            Hook::ConcatWithPoints { mask, .. } => write!(f, "concat_with_points {mask}"),
            Hook::ConstantString { class_id, offset } => write!(f, "constant_string {class_id} {offset}"),
            Hook::ArrayCopy => f.write_str("array_copy"),
            Hook::ArrayClone => f.write_str("array_clone"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Insn {
    Nop,
    Label(LabelId),
    Const(Constant),
    Load(u16),
    Store(u16),
    Dup,
    /// `[a, b] -> [b, a, b]`
    DupX1,
    /// `[a, b] -> [a, b, a, b]`
    Dup2,
    Pop,
    Swap,
    ArrayLoad(Type),
    ArrayStore(Type),
    ArrayLength,
    NewArray(Type),
    GetField(FieldRef),
    PutField(FieldRef),
    Binary { op: BinaryOp, ty: Type },
    Convert { from: Type, to: Type },
    Invoke(MethodRef),
    /// String concatenation of the given operand types
    Concat(Vec<Type>),
    Goto(LabelId),
    /// Compares the top int with zero
    If { cond: Cond, target: LabelId },
    /// Compares the two top ints
    IfCmp { cond: Cond, target: LabelId },
    IfNull(LabelId),
    IfNonNull(LabelId),
    /// Reference identity comparison
    IfRefEq(LabelId),
    IfRefNe(LabelId),
    Return(Type),
    Hook(Hook),
}

impl Insn {
    /// Number of operands popped and pushed
    pub fn stack_effect(&self) -> (usize, usize) {
        match self {
            Insn::Nop | Insn::Label(_) | Insn::Goto(_) => (0, 0),
            Insn::Const(_) | Insn::Load(_) => (0, 1),
            Insn::Store(_) | Insn::Pop => (1, 0),
            Insn::Dup => (1, 2),
            Insn::DupX1 => (2, 3),
            Insn::Dup2 => (2, 4),
            Insn::Swap => (2, 2),
            Insn::ArrayLoad(_) => (2, 1),
            Insn::ArrayStore(_) => (3, 0),
            Insn::ArrayLength | Insn::NewArray(_) | Insn::GetField(_) | Insn::Convert { .. } => (1, 1),
            Insn::PutField(_) => (2, 0),
            Insn::Binary { .. } => (2, 1),
            Insn::Invoke(method) => (method.operand_count(), usize::from(method.desc.ret != Type::Void)),
            Insn::Concat(args) => (args.len(), 1),
            Insn::If { .. } | Insn::IfNull(_) | Insn::IfNonNull(_) => (1, 0),
            Insn::IfCmp { .. } | Insn::IfRefEq(_) | Insn::IfRefNe(_) => (2, 0),
            Insn::Return(ty) => (usize::from(*ty != Type::Void), 0),
            Insn::Hook(hook) => hook.stack_effect(),
        }
    }

    pub fn jump_target(&self) -> Option<LabelId> {
        match self {
            Insn::Goto(target)
            | Insn::If { target, .. }
            | Insn::IfCmp { target, .. }
            | Insn::IfNull(target)
            | Insn::IfNonNull(target)
            | Insn::IfRefEq(target)
            | Insn::IfRefNe(target) => Some(*target),
            _ => None,
        }
    }

    pub fn falls_through(&self) -> bool {
        !matches!(self, Insn::Goto(_) | Insn::Return(_))
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Insn::Return(_))
    }

    pub fn local_index(&self) -> Option<u16> {
        match self {
            Insn::Load(index) | Insn::Store(index) => Some(*index),
            _ => None,
        }
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insn::Nop => f.write_str("nop"),
            Insn::Label(label) => write!(f, "L{label}:"),
            Insn::Const(constant) => write!(f, "const {constant}"),
            Insn::Load(index) => write!(f, "load {index}"),
            Insn::Store(index) => write!(f, "store {index}"),
            Insn::Dup => f.write_str("dup"),
            Insn::DupX1 => f.write_str("dup_x1"),
            Insn::Dup2 => f.write_str("dup2"),
            Insn::Pop => f.write_str("pop"),
            Insn::Swap => f.write_str("swap"),
            Insn::ArrayLoad(ty) => write!(f, "array_load {ty}"),
            Insn::ArrayStore(ty) => write!(f, "array_store {ty}"),
            Insn::ArrayLength => f.write_str("array_length"),
            Insn::NewArray(ty) => write!(f, "new_array {ty}"),
            Insn::GetField(field) => write!(f, "get_field {}.{} {}", field.owner, field.name, field.ty),
            Insn::PutField(field) => write!(f, "put_field {}.{} {}", field.owner, field.name, field.ty),
            Insn::Binary { op, ty } => write!(f, "{} {ty}", format!("{op:?}").to_lowercase()),
            Insn::Convert { from, to } => write!(f, "convert {from} -> {to}"),
            Insn::Invoke(method) => {
                write!(f, "invoke {:?} {}.{} {}", method.kind, method.owner, method.name, method.desc)
            }
            Insn::Concat(args) => {
                let args: Vec<String> = args.iter().map(Type::to_string).collect();
                write!(f, "concat ({})", args.join(", "))
            }
            Insn::Goto(target) => write!(f, "goto L{target}"),
            Insn::If { cond, target } => write!(f, "if {cond:?} L{target}"),
            Insn::IfCmp { cond, target } => write!(f, "if_cmp {cond:?} L{target}"),
            Insn::IfNull(target) => write!(f, "if_null L{target}"),
            Insn::IfNonNull(target) => write!(f, "if_non_null L{target}"),
            Insn::IfRefEq(target) => write!(f, "if_ref_eq L{target}"),
            Insn::IfRefNe(target) => write!(f, "if_ref_ne L{target}"),
            Insn::Return(ty) => write!(f, "return {ty}"),
            Insn::Hook(hook) => write!(f, "hook {hook}"),
        }
    }
}
