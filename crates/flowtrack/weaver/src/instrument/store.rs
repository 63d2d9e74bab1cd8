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

//! Store sites: places where a tracked value leaves the method's frame

use super::synth::Synthesizer;
use crate::analysis::heuristics::{
    args_to_instrument_for, cloned_array, is_array_copy, is_pass_through, keeps_identity_comparisons,
    should_instrument_invocation, should_track_field,
};
use crate::analysis::{Analysis, FlowValue};
use crate::error::WeaveResult;
use crate::ir::{Cond, Constant, Hook, Insn, LabelId, Method, Type};

#[derive(Debug, Clone, PartialEq)]
pub enum StoreSite {
    /// Element written into an array
    ArrayStore { insn: usize, elem: Type, value: FlowValue },
    /// Tracked field written
    FieldStore { insn: usize, field_id: String, value: FlowValue },
    /// Arguments of an instrumented call, `None` for arguments that are not recorded
    CallArguments { insn: usize, args: Vec<Option<FlowValue>> },
    /// Value returned from an instrumented method
    ReturnValue { insn: usize, value: FlowValue },
    /// String concatenation with character operands
    Concat { insn: usize, args: Vec<Type>, values: Vec<FlowValue> },
    /// Identity comparison between strings
    StringComparison { insn: usize, equal: bool, target: LabelId },
    /// String literal that gets its own instance
    StringLiteral { insn: usize, value: String },
    /// `System.arraycopy` between two `char[]` or two `byte[]`
    ArrayCopy { insn: usize },
    /// `clone()` of a primitive array
    ArrayClone { insn: usize },
}

impl StoreSite {
    pub fn insn(&self) -> usize {
        match self {
            StoreSite::ArrayStore { insn, .. }
            | StoreSite::FieldStore { insn, .. }
            | StoreSite::CallArguments { insn, .. }
            | StoreSite::ReturnValue { insn, .. }
            | StoreSite::Concat { insn, .. }
            | StoreSite::StringComparison { insn, .. }
            | StoreSite::StringLiteral { insn, .. }
            | StoreSite::ArrayCopy { insn }
            | StoreSite::ArrayClone { insn } => *insn,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StoreSite::ArrayStore { .. } => "array_store",
            StoreSite::FieldStore { .. } => "field_store",
            StoreSite::CallArguments { .. } => "call_arguments",
            StoreSite::ReturnValue { .. } => "return_value",
            StoreSite::Concat { .. } => "concat",
            StoreSite::StringComparison { .. } => "string_comparison",
            StoreSite::StringLiteral { .. } => "string_literal",
            StoreSite::ArrayCopy { .. } => "array_copy",
            StoreSite::ArrayClone { .. } => "array_clone",
        }
    }

    /// Plans the edits for this site
    pub fn instrument(&self, synth: &mut Synthesizer<'_>) -> WeaveResult<()> {
        match self {
            StoreSite::ArrayStore { insn, elem, value } => {
                let tracked = synth.is_trackable(value);
                if tracked {
                    synth.ensure_tracked(value)?;
                }
                let mut code = if tracked { synth.load_point(value)? } else { vec![Insn::Const(Constant::Null)] };
                code.push(Insn::Hook(Hook::ArrayStoreWithPoint(elem.clone())));
                let depth = synth.stack_before(*insn)? + 1;
                synth.require_stack(depth);
                synth.replace(*insn, code);
            }
            StoreSite::FieldStore { insn, field_id, value } => {
                // [target, value] -> [target, value, target] -> ... -> [target, value]
                let mut code = vec![Insn::Dup2, Insn::Pop];
                if synth.is_trackable(value) {
                    synth.ensure_tracked(value)?;
                    code.extend(synth.load_point(value)?);
                } else {
                    code.push(Insn::Const(Constant::Null));
                }
                code.push(Insn::Hook(Hook::SetFieldPoint(field_id.clone())));
                let depth = synth.stack_before(*insn)? + 2;
                synth.require_stack(depth);
                synth.insert_before(*insn, code);
            }
            StoreSite::CallArguments { insn, args } => {
                let mut recorded = false;
                for (arg, value) in args.iter().enumerate() {
                    let Some(value) = value else { continue };
                    if !synth.is_trackable(value) {
                        continue;
                    }
                    synth.ensure_tracked(value)?;
                    let code = synth.load_point(value)?;
                    synth.add_call_argument(*insn, arg as u8, code);
                    recorded = true;
                }
                if recorded {
                    let depth = synth.stack_before(*insn)? + 2;
                    synth.require_stack(depth);
                }
            }
            StoreSite::ReturnValue { insn, value } => {
                if synth.is_trackable(value) {
                    synth.ensure_tracked(value)?;
                    let local = synth.ensure_started();
                    let mut code = vec![Insn::Load(local)];
                    code.extend(synth.load_point(value)?);
                    code.push(Insn::Hook(Hook::InvocationReturning));
                    let depth = synth.stack_before(*insn)? + 2;
                    synth.require_stack(depth);
                    synth.insert_before(*insn, code);
                }
            }
            StoreSite::Concat { insn, args, values } => {
                let mut mask = String::with_capacity(args.len());
                let mut loads = Vec::new();
                for (ty, value) in args.iter().zip(values) {
                    if *ty == Type::Char && synth.is_trackable(value) {
                        synth.ensure_tracked(value)?;
                        loads.extend(synth.load_point(value)?);
                        mask.push('T');
                    } else {
                        mask.push('.');
                    }
                }
                let points = mask.chars().filter(|c| *c == 'T').count();
                if points > 0 {
                    let depth = synth.stack_before(*insn)? + points;
                    synth.require_stack(depth);
                    loads.push(Insn::Hook(Hook::ConcatWithPoints { args: args.clone(), mask }));
                    synth.replace(*insn, loads);
                }
            }
            StoreSite::StringComparison { insn, equal, target } => {
                // equal strings give 1: jump when the outcome matches the original branch
                let cond = if *equal { Cond::Ne } else { Cond::Eq };
                synth.replace(*insn, vec![Insn::Hook(Hook::StringEquals), Insn::If { cond, target: *target }]);
            }
            StoreSite::StringLiteral { insn, value } => {
                let (class_id, offset) = synth.track_string(value)?;
                synth.insert_after(*insn, vec![Insn::Hook(Hook::ConstantString { class_id, offset })]);
            }
            StoreSite::ArrayCopy { insn } => synth.replace(*insn, vec![Insn::Hook(Hook::ArrayCopy)]),
            StoreSite::ArrayClone { insn } => synth.replace(*insn, vec![Insn::Hook(Hook::ArrayClone)]),
        }
        Ok(())
    }
}

/// Finds every store site in reachable code, in instruction order
pub fn find_store_sites(method: &Method, analysis: &Analysis, break_interning: bool) -> Vec<StoreSite> {
    let returns_tracked = should_instrument_invocation(&method.owner, &method.name, &method.desc);
    let rewrite_comparisons = !keeps_identity_comparisons(&method.owner);
    let mut sites = Vec::new();

    for (insn, instruction) in method.insns.iter().enumerate() {
        let Some(frame) = analysis.frame(insn) else { continue };
        let top = |depth: usize| frame.peek(depth).cloned().unwrap_or(FlowValue::Untrackable(None));
        match instruction {
            Insn::ArrayStore(elem) if elem.is_tracked_element() => {
                sites.push(StoreSite::ArrayStore { insn, elem: elem.clone(), value: top(0) });
            }
            Insn::PutField(field) if should_track_field(field) => {
                sites.push(StoreSite::FieldStore { insn, field_id: field.field_id(), value: top(0) });
            }
            Insn::Invoke(target) if is_array_copy(target) => {
                if copies_tracked_elements(&top(4), &top(2)) {
                    sites.push(StoreSite::ArrayCopy { insn });
                }
            }
            Insn::Invoke(target) if cloned_array(target).is_some() => {
                sites.push(StoreSite::ArrayClone { insn });
            }
            // the argument's provenance flows into the result instead
            Insn::Invoke(target) if is_pass_through(target) => {}
            Insn::Invoke(target) => {
                if let Some(instrumented) = args_to_instrument_for(target) {
                    let count = instrumented.len();
                    let args = instrumented
                        .iter()
                        .enumerate()
                        .map(|(arg, tracked)| tracked.then(|| top(count - 1 - arg)))
                        .collect();
                    sites.push(StoreSite::CallArguments { insn, args });
                }
            }
            Insn::Return(ty) if returns_tracked && *ty != Type::Void => {
                sites.push(StoreSite::ReturnValue { insn, value: top(0) });
            }
            Insn::Concat(args) if args.contains(&Type::Char) => {
                let values = (0..args.len()).rev().map(top).collect();
                sites.push(StoreSite::Concat { insn, args: args.clone(), values });
            }
            Insn::IfRefEq(target) | Insn::IfRefNe(target)
                if rewrite_comparisons && (top(0).is_string() || top(1).is_string()) =>
            {
                let equal = matches!(instruction, Insn::IfRefEq(_));
                sites.push(StoreSite::StringComparison { insn, equal, target: *target });
            }
            Insn::Const(Constant::Str(value)) if break_interning => {
                sites.push(StoreSite::StringLiteral { insn, value: value.clone() });
            }
            _ => {}
        }
    }
    sites
}

fn copies_tracked_elements(source: &FlowValue, target: &FlowValue) -> bool {
    match (source.ty(), target.ty()) {
        (Some(Type::Array(from)), Some(Type::Array(to))) => from == to && from.is_tracked_scalar(),
        _ => false,
    }
}
