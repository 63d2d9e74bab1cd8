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

//! Code synthesis: turns planned edits into a new instruction stream
//!
//! Edits are keyed by the index of the original instruction they attach to. New
//! locals are numbered from the method's original `max_locals` upwards and are set
//! in a prologue, so they hold `null` on every path that skips their producer.

use super::constants::ConstantPool;
use crate::analysis::{Analysis, FlowValue, Frame, MergeSlot};
use crate::error::{WeaveError, WeaveResult};
use crate::ir::{Constant, Hook, Insn, Method};
use flowtrack_core::ClassConstant;
use std::collections::{BTreeMap, HashMap};

/// Record handed to an instrumented call
#[derive(Debug, Default)]
struct OutgoingCall {
    args: Vec<(u8, Vec<Insn>)>,
    /// Local receiving the record after the call, when the result is tracked
    store: Option<u16>,
}

pub struct Synthesizer<'a> {
    method: &'a Method,
    analysis: &'a Analysis,
    pool: &'a mut ConstantPool,
    before: BTreeMap<usize, Vec<Insn>>,
    after: BTreeMap<usize, Vec<Insn>>,
    replace: BTreeMap<usize, Vec<Insn>>,
    outgoing: BTreeMap<usize, OutgoingCall>,
    null_locals: Vec<u16>,
    next_local: u16,
    max_stack: usize,
    invocation_local: Option<u16>,
    point_locals: HashMap<usize, u16>,
    constants: HashMap<usize, ClassConstant>,
    merge_locals: HashMap<MergeSlot, Option<u16>>,
    trackable: HashMap<MergeSlot, bool>,
}

impl<'a> Synthesizer<'a> {
    pub fn new(method: &'a Method, analysis: &'a Analysis, pool: &'a mut ConstantPool) -> Self {
        Self {
            method,
            analysis,
            pool,
            before: BTreeMap::new(),
            after: BTreeMap::new(),
            replace: BTreeMap::new(),
            outgoing: BTreeMap::new(),
            null_locals: Vec::new(),
            next_local: method.max_locals,
            max_stack: usize::from(method.max_stack).max(analysis.max_stack),
            invocation_local: None,
            point_locals: HashMap::new(),
            constants: HashMap::new(),
            merge_locals: HashMap::new(),
            trackable: HashMap::new(),
        }
    }

    pub fn method(&self) -> &'a Method {
        self.method
    }

    pub fn frame(&self, insn: usize) -> WeaveResult<&'a Frame> {
        self.analysis.frame(insn).ok_or_else(|| WeaveError::Unsupported {
            insn,
            reason: "no frame for unreachable instruction".to_string(),
        })
    }

    pub fn stack_before(&self, insn: usize) -> WeaveResult<usize> {
        Ok(self.frame(insn)?.stack_len())
    }

    pub fn stack_after(&self, insn: usize) -> WeaveResult<usize> {
        let (pops, pushes) = self.method.insns[insn].stack_effect();
        Ok(self.stack_before(insn)? - pops + pushes)
    }

    /// Raises the reported stack depth to at least `depth`
    pub fn require_stack(&mut self, depth: usize) {
        self.max_stack = self.max_stack.max(depth);
    }

    fn new_local(&mut self) -> u16 {
        let local = self.next_local;
        self.next_local += 1;
        local
    }

    fn new_null_local(&mut self) -> u16 {
        let local = self.new_local();
        self.null_locals.push(local);
        local
    }

    pub fn is_trackable(&mut self, value: &FlowValue) -> bool {
        self.analysis.is_trackable(value, &mut self.trackable)
    }

    pub fn insert_before(&mut self, insn: usize, code: Vec<Insn>) {
        self.before.entry(insn).or_default().extend(code);
    }

    pub fn insert_after(&mut self, insn: usize, code: Vec<Insn>) {
        self.after.entry(insn).or_default().extend(code);
    }

    pub fn replace(&mut self, insn: usize, code: Vec<Insn>) {
        self.replace.insert(insn, code);
    }

    /// Records the point of argument `arg` on the call record of the call at `insn`
    pub fn add_call_argument(&mut self, insn: usize, arg: u8, load_point: Vec<Insn>) {
        self.outgoing.entry(insn).or_default().args.push((arg, load_point));
    }

    pub fn track_string(&mut self, value: &str) -> WeaveResult<(u32, usize)> {
        self.pool.track_string(self.method, value)
    }

    /// Local holding this method's own call record, claimed at entry
    pub fn ensure_started(&mut self) -> u16 {
        match self.invocation_local {
            Some(local) => local,
            None => {
                let local = self.new_local();
                self.invocation_local = Some(local);
                self.require_stack(1);
                local
            }
        }
    }

    /// Emits, once, whatever is needed for [`Self::load_point`] to work on `value`
    pub fn ensure_tracked(&mut self, value: &FlowValue) -> WeaveResult<()> {
        match value {
            FlowValue::Untrackable(_) => {}
            FlowValue::Constant { insn, value, .. } => {
                if !self.constants.contains_key(insn) {
                    let constant = self.pool.track_constant(self.method, *value)?;
                    self.constants.insert(*insn, constant);
                }
            }
            FlowValue::ArrayElementLoad { insn, .. } => {
                if !self.point_locals.contains_key(insn) {
                    let local = self.new_null_local();
                    self.point_locals.insert(*insn, local);
                    self.insert_before(*insn, vec![Insn::Dup2, Insn::Hook(Hook::ElementPoint), Insn::Store(local)]);
                    let depth = self.stack_before(*insn)? + 2;
                    self.require_stack(depth);
                }
            }
            FlowValue::FieldLoad { insn, field_id, .. } => {
                if !self.point_locals.contains_key(insn) {
                    let local = self.new_null_local();
                    self.point_locals.insert(*insn, local);
                    self.insert_before(
                        *insn,
                        vec![Insn::Dup, Insn::Hook(Hook::FieldPoint(field_id.clone())), Insn::Store(local)],
                    );
                    let depth = self.stack_before(*insn)? + 1;
                    self.require_stack(depth);
                }
            }
            FlowValue::CallReturn { insn, .. } => {
                if self.outgoing.get(insn).is_none_or(|call| call.store.is_none()) {
                    let local = self.new_null_local();
                    self.outgoing.entry(*insn).or_default().store = Some(local);
                    // the record stays on the stack across the call's operands
                    let depth = self.stack_before(*insn)? + 1;
                    self.require_stack(depth);
                }
            }
            FlowValue::CallArgument { .. } => {
                self.ensure_started();
            }
            FlowValue::Cast { target, .. } => self.ensure_tracked(target)?,
            FlowValue::Copy { original, .. } => self.ensure_tracked(original)?,
            FlowValue::Merged { slot, .. } => {
                if self.merge_locals.contains_key(slot) {
                    return Ok(());
                }
                if !self.is_trackable(value) {
                    self.merge_locals.insert(*slot, None);
                    return Ok(());
                }
                let local = self.new_null_local();
                self.merge_locals.insert(*slot, Some(local));
                let analysis = self.analysis;
                for member in analysis.merges.members(slot) {
                    self.ensure_tracked(member)?;
                    let mut stash = self.load_point(member)?;
                    stash.push(Insn::Store(local));
                    match member {
                        // a nested merge exists on entry to its join instruction
                        FlowValue::Merged { slot: inner, .. } => {
                            let depth = self.stack_before(inner.insn)? + 1;
                            self.require_stack(depth);
                            self.insert_before(inner.insn, stash);
                        }
                        _ => {
                            let Some(created) = member.creation_insn() else {
                                return Err(WeaveError::Unsupported {
                                    insn: slot.insn,
                                    reason: "merge member without creation site".to_string(),
                                });
                            };
                            let depth = self.stack_after(created)? + 1;
                            self.require_stack(depth);
                            self.insert_after(created, stash);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Code pushing the point of `value`, or `null`; needs one extra stack slot
    pub fn load_point(&self, value: &FlowValue) -> WeaveResult<Vec<Insn>> {
        let null = vec![Insn::Const(Constant::Null)];
        let missing = |insn: usize| WeaveError::Unsupported { insn, reason: "value was not tracked".to_string() };
        Ok(match value {
            FlowValue::Untrackable(_) => null,
            FlowValue::Constant { insn, .. } => {
                let constant = self.constants.get(insn).ok_or_else(|| missing(*insn))?;
                vec![Insn::Hook(Hook::ConstantPoint(*constant))]
            }
            FlowValue::ArrayElementLoad { insn, .. } | FlowValue::FieldLoad { insn, .. } => {
                vec![Insn::Load(*self.point_locals.get(insn).ok_or_else(|| missing(*insn))?)]
            }
            FlowValue::CallReturn { insn, .. } => {
                let local = self.outgoing.get(insn).and_then(|call| call.store).ok_or_else(|| missing(*insn))?;
                vec![Insn::Load(local), Insn::Hook(Hook::InvocationReturnPoint)]
            }
            FlowValue::CallArgument { arg, .. } => {
                let local = self.invocation_local.ok_or_else(|| missing(0))?;
                vec![Insn::Load(local), Insn::Hook(Hook::InvocationArgPoint(*arg))]
            }
            FlowValue::Cast { target, .. } => self.load_point(target)?,
            FlowValue::Copy { original, .. } => self.load_point(original)?,
            FlowValue::Merged { slot, .. } => match self.merge_locals.get(slot) {
                Some(Some(local)) => vec![Insn::Load(*local)],
                Some(None) => null,
                None => return Err(missing(slot.insn)),
            },
        })
    }

    pub fn has_edits(&self) -> bool {
        !(self.before.is_empty() && self.after.is_empty() && self.replace.is_empty() && self.outgoing.is_empty())
    }

    fn outgoing_code(&self, insn: usize, call: OutgoingCall) -> Vec<Insn> {
        let mut code = Vec::new();
        if let Insn::Invoke(target) = &self.method.insns[insn] {
            code.push(Insn::Hook(Hook::InvocationCreate(target.signature())));
        }
        for (arg, load_point) in call.args {
            code.extend(load_point);
            code.push(Insn::Hook(Hook::InvocationSetArg(arg)));
        }
        code.push(Insn::Hook(Hook::InvocationCalling));
        code.push(match call.store {
            Some(local) => Insn::Store(local),
            None => Insn::Pop,
        });
        code
    }

    /// Applies every edit, producing the instrumented method
    pub fn finish(mut self) -> Method {
        let method = self.method;
        let mut insns = Vec::with_capacity(method.insns.len() * 2);

        if !self.null_locals.is_empty() {
            self.require_stack(1);
        }
        for local in &self.null_locals {
            insns.push(Insn::Const(Constant::Null));
            insns.push(Insn::Store(*local));
        }
        if let Some(local) = self.invocation_local {
            insns.push(Insn::Hook(Hook::InvocationStart(method.signature())));
            insns.push(Insn::Store(local));
        }

        let mut outgoing = std::mem::take(&mut self.outgoing);
        for (index, insn) in method.insns.iter().enumerate() {
            let mut before = self.before.remove(&index).unwrap_or_default();
            if let Some(call) = outgoing.remove(&index) {
                before.extend(self.outgoing_code(index, call));
            }
            if let Insn::Label(_) = insn {
                // code at a jump target must run on every path into it
                insns.push(insn.clone());
                insns.extend(before);
            } else {
                insns.extend(before);
                match self.replace.remove(&index) {
                    Some(code) => insns.extend(code),
                    None => insns.push(insn.clone()),
                }
            }
            insns.extend(self.after.remove(&index).unwrap_or_default());
        }

        Method {
            owner: method.owner.clone(),
            name: method.name.clone(),
            desc: method.desc.clone(),
            is_static: method.is_static,
            max_locals: self.next_local,
            max_stack: u16::try_from(self.max_stack).unwrap_or(u16::MAX),
            insns,
        }
    }
}
