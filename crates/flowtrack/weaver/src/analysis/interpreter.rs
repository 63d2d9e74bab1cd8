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

//! Transfer function: the effect of one instruction on an abstract frame

use super::frame::Frame;
use super::heuristics::{
    args_to_instrument, cloned_array, is_char_at, is_pass_through, should_instrument_invocation, should_track_field,
};
use super::value::FlowValue;
use crate::error::{WeaveError, WeaveResult};
use crate::ir::{BinaryOp, Constant, Insn, Method, Type};

pub struct FlowInterpreter<'a> {
    method: &'a Method,
}

fn is_int_like(ty: &Type) -> bool {
    matches!(ty, Type::Byte | Type::Char | Type::Short | Type::Int)
}

impl<'a> FlowInterpreter<'a> {
    pub fn new(method: &'a Method) -> Self {
        Self { method }
    }

    /// Frame at the first instruction: receiver and parameters in the low locals
    pub fn entry_frame(&self) -> WeaveResult<Frame> {
        let method = self.method;
        let param_slots = method.param_slots();
        if param_slots > usize::from(method.max_locals) {
            return Err(WeaveError::InvalidLocal {
                insn: 0,
                index: param_slots as u16 - 1,
                max_locals: method.max_locals,
            });
        }
        let mut frame = Frame::new(method.max_locals);
        let mut local = 0u16;
        if !method.is_static {
            frame.set_local(0, local, FlowValue::untrackable(Type::Object(method.owner.clone())))?;
            local += 1;
        }
        let instrumented = args_to_instrument(&method.name, &method.desc);
        for (arg, ty) in method.desc.params.iter().enumerate() {
            let tracked = instrumented.as_ref().is_some_and(|args| args[arg]);
            let value = if tracked {
                FlowValue::CallArgument { ty: ty.clone(), arg: arg as u8 }
            } else {
                FlowValue::untrackable(ty.clone())
            };
            frame.set_local(0, local, value)?;
            local += 1;
        }
        Ok(frame)
    }

    /// Frame after executing `insn` (at `index`) on `frame`
    pub fn execute(&self, index: usize, insn: &Insn, frame: &Frame) -> WeaveResult<Frame> {
        let mut out = frame.clone();
        match insn {
            Insn::Nop | Insn::Label(_) | Insn::Goto(_) => {}
            Insn::Const(constant) => out.push(match constant {
                Constant::Int(value) => FlowValue::Constant { ty: Type::Int, insn: index, value: i64::from(*value) },
                other => FlowValue::untrackable(other.ty()),
            }),
            Insn::Load(local) => {
                let value = FlowValue::copy(index, out.local(index, *local)?);
                out.push(value);
            }
            Insn::Store(local) => {
                let value = out.pop(index)?;
                out.set_local(index, *local, FlowValue::copy(index, &value))?;
            }
            Insn::Dup => {
                let value = out.pop(index)?;
                out.push(value.clone());
                out.push(FlowValue::copy(index, &value));
            }
            Insn::DupX1 => {
                let top = out.pop(index)?;
                let below = out.pop(index)?;
                out.push(FlowValue::copy(index, &top));
                out.push(below);
                out.push(top);
            }
            Insn::Dup2 => {
                let top = out.pop(index)?;
                let below = out.pop(index)?;
                out.push(below.clone());
                out.push(top.clone());
                out.push(FlowValue::copy(index, &below));
                out.push(FlowValue::copy(index, &top));
            }
            Insn::Pop => {
                out.pop(index)?;
            }
            Insn::Swap => {
                let top = out.pop(index)?;
                let below = out.pop(index)?;
                out.push(FlowValue::copy(index, &top));
                out.push(FlowValue::copy(index, &below));
            }
            Insn::ArrayLoad(ty) => {
                out.pop_n(index, 2)?;
                out.push(if ty.is_tracked_element() {
                    FlowValue::ArrayElementLoad { ty: ty.clone(), insn: index }
                } else {
                    FlowValue::untrackable(ty.clone())
                });
            }
            Insn::ArrayStore(_) => {
                out.pop_n(index, 3)?;
            }
            Insn::ArrayLength => {
                out.pop(index)?;
                out.push(FlowValue::untrackable(Type::Int));
            }
            Insn::NewArray(ty) => {
                out.pop(index)?;
                out.push(FlowValue::untrackable(Type::array_of(ty.clone())));
            }
            Insn::GetField(field) => {
                out.pop(index)?;
                out.push(if should_track_field(field) {
                    FlowValue::FieldLoad { ty: field.ty.clone(), insn: index, field_id: field.field_id() }
                } else {
                    FlowValue::untrackable(field.ty.clone())
                });
            }
            Insn::PutField(_) => {
                out.pop_n(index, 2)?;
            }
            Insn::Binary { op, ty } => {
                let second = out.pop(index)?;
                let first = out.pop(index)?;
                out.push(Self::binary(*op, ty, first, second));
            }
            Insn::Convert { from, to } => {
                let value = out.pop(index)?;
                out.push(if is_int_like(from) && is_int_like(to) {
                    value.retyped(to)
                } else if matches!((from, to), (Type::Int, Type::Long) | (Type::Long, Type::Int)) && value.may_be_trackable() {
                    FlowValue::Cast { ty: to.clone(), insn: index, target: Box::new(value) }
                } else {
                    FlowValue::untrackable(to.clone())
                });
            }
            Insn::Invoke(method) => {
                let args = out.pop_n(index, method.operand_count())?;
                if is_pass_through(method) {
                    let arg = args.last().ok_or(WeaveError::StackUnderflow { insn: index })?;
                    out.push(arg.retyped(&method.desc.ret));
                } else if is_char_at(method) {
                    out.push(FlowValue::ArrayElementLoad { ty: Type::Char, insn: index });
                } else if let Some(array) = cloned_array(method) {
                    out.push(FlowValue::untrackable(array));
                } else if should_instrument_invocation(&method.owner, &method.name, &method.desc) {
                    out.push(FlowValue::CallReturn { ty: method.desc.ret.clone(), insn: index });
                } else if method.desc.ret != Type::Void {
                    out.push(FlowValue::untrackable(method.desc.ret.clone()));
                }
            }
            Insn::Concat(args) => {
                out.pop_n(index, args.len())?;
                out.push(FlowValue::untrackable(Type::string()));
            }
            Insn::If { .. } | Insn::IfNull(_) | Insn::IfNonNull(_) => {
                out.pop(index)?;
            }
            Insn::IfCmp { .. } | Insn::IfRefEq(_) | Insn::IfRefNe(_) => {
                out.pop_n(index, 2)?;
            }
            Insn::Return(ty) => {
                if *ty != Type::Void {
                    out.pop(index)?;
                }
            }
            Insn::Hook(_) => {
                return Err(WeaveError::Unsupported { insn: index, reason: "method is already instrumented".to_string() });
            }
        }
        Ok(out)
    }

    /// Masking with a constant and shifting right by a constant keep the operand's provenance
    fn binary(op: BinaryOp, ty: &Type, first: FlowValue, second: FlowValue) -> FlowValue {
        match op {
            BinaryOp::And if second.constant_value().is_some() && first.constant_value().is_none() => first,
            BinaryOp::And if first.constant_value().is_some() && second.constant_value().is_none() => second,
            BinaryOp::Ushr if second.constant_value().is_some() => first,
            _ => FlowValue::untrackable(ty.clone()),
        }
    }
}
