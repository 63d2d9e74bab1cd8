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

//! Fixed-point solver over a method's instructions

use super::cfg::ControlFlowGraph;
use super::frame::Frame;
use super::interpreter::FlowInterpreter;
use super::merge::{MergeIndex, MergeSlot};
use super::value::FlowValue;
use crate::error::{WeaveError, WeaveResult};
use crate::ir::Method;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::trace;

pub const DEFAULT_MAX_ITERATIONS: usize = 100_000;

/// Order in which pending instructions are revisited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverOrder {
    #[default]
    Fifo,
    Lifo,
}

impl std::str::FromStr for SolverOrder {
    type Err = WeaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(SolverOrder::Fifo),
            "lifo" => Ok(SolverOrder::Lifo),
            other => Err(WeaveError::InvalidConfig(format!("unknown solver order '{other}'"))),
        }
    }
}

/// Converged analysis of one method
#[derive(Debug)]
pub struct Analysis {
    /// Frame before each instruction; `None` where unreachable
    pub frames: Vec<Option<Frame>>,
    pub merges: MergeIndex,
    pub cfg: ControlFlowGraph,
    /// Highest stack depth reached anywhere
    pub max_stack: usize,
    pub iterations: usize,
}

impl Analysis {
    pub fn frame(&self, insn: usize) -> Option<&Frame> {
        self.frames.get(insn).and_then(Option::as_ref)
    }

    /// Final trackability of a value, see [`MergeIndex::is_trackable`]
    pub fn is_trackable(&self, value: &FlowValue, memo: &mut HashMap<MergeSlot, bool>) -> bool {
        self.merges.is_trackable(value, memo)
    }
}

#[derive(Debug, Clone)]
pub struct FlowAnalyzer {
    order: SolverOrder,
    max_iterations: usize,
}

impl Default for FlowAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowAnalyzer {
    pub fn new() -> Self {
        Self { order: SolverOrder::default(), max_iterations: DEFAULT_MAX_ITERATIONS }
    }

    pub fn with_order(mut self, order: SolverOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn analyze(&self, method: &Method) -> WeaveResult<Analysis> {
        let cfg = ControlFlowGraph::from_method(method)?;
        let interpreter = FlowInterpreter::new(method);
        let count = method.insns.len();

        let mut frames: Vec<Option<Frame>> = vec![None; count];
        let mut merges = MergeIndex::new();
        let mut queued = vec![false; count];
        let mut worklist = VecDeque::new();
        let mut max_stack = 0;
        let mut iterations = 0;

        frames[0] = Some(interpreter.entry_frame()?);
        worklist.push_back(0);
        queued[0] = true;

        while let Some(index) = self.next(&mut worklist) {
            queued[index] = false;
            iterations += 1;
            if iterations > self.max_iterations {
                return Err(WeaveError::NoConvergence { iterations: self.max_iterations });
            }
            let Some(frame) = frames[index].clone() else {
                continue;
            };
            let out = interpreter.execute(index, &method.insns[index], &frame)?;
            let (pops, pushes) = method.insns[index].stack_effect();
            max_stack = max_stack.max(frame.stack_len()).max(frame.stack_len() - pops + pushes);

            for &successor in &cfg.successors[index] {
                let changed = match frames[successor].as_mut() {
                    Some(existing) => Self::merge_into(existing, &out, successor, &mut merges)?,
                    None => {
                        frames[successor] = Some(out.clone());
                        true
                    }
                };
                if changed && !queued[successor] {
                    queued[successor] = true;
                    worklist.push_back(successor);
                }
            }
        }

        trace!(method = %method.name, iterations, merges = merges.len(), "analysis converged");
        Ok(Analysis { frames, merges, cfg, max_stack, iterations })
    }

    fn next(&self, worklist: &mut VecDeque<usize>) -> Option<usize> {
        match self.order {
            SolverOrder::Fifo => worklist.pop_front(),
            SolverOrder::Lifo => worklist.pop_back(),
        }
    }

    /// Merges `incoming` into the frame already recorded at `insn`; true if it changed
    fn merge_into(existing: &mut Frame, incoming: &Frame, insn: usize, merges: &mut MergeIndex) -> WeaveResult<bool> {
        if existing.stack_len() != incoming.stack_len() {
            return Err(WeaveError::StackHeightMismatch {
                insn,
                expected: existing.stack_len(),
                found: incoming.stack_len(),
            });
        }
        let mut changed = false;
        for (index, (slot, value)) in existing.locals_mut().iter_mut().zip(incoming.locals()).enumerate() {
            let merged = merges.merge(MergeSlot::local(insn, index), slot, value);
            if merged != *slot {
                *slot = merged;
                changed = true;
            }
        }
        for (index, (slot, value)) in existing.stack_mut().iter_mut().zip(incoming.stack()).enumerate() {
            let merged = merges.merge(MergeSlot::stack(insn, index), slot, value);
            if merged != *slot {
                *slot = merged;
                changed = true;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Cond, Constant, Insn, Type};

    #[test]
    fn test_straight_line() {
        let method = Method::new("demo/A", "f", "([C)C", true).unwrap().with_insns(vec![
            Insn::Load(0),
            Insn::Const(Constant::Int(1)),
            Insn::ArrayLoad(Type::Char),
            Insn::Return(Type::Char),
        ]);
        let analysis = FlowAnalyzer::new().analyze(&method).unwrap();
        assert_eq!(analysis.max_stack, 2);
        assert_eq!(
            analysis.frame(3).unwrap().peek(0),
            Some(&FlowValue::ArrayElementLoad { ty: Type::Char, insn: 2 })
        );
    }

    #[test]
    fn test_branches_merge_at_join() {
        // c = flag ? 'A' : 'B'
        let method = Method::new("demo/A", "pick", "(Z)C", true).unwrap().with_insns(vec![
            Insn::Load(0),
            Insn::If { cond: Cond::Eq, target: 1 },
            Insn::Const(Constant::Int('A' as i32)),
            Insn::Goto(2),
            Insn::Label(1),
            Insn::Const(Constant::Int('B' as i32)),
            Insn::Label(2),
            Insn::Return(Type::Char),
        ]);
        let analysis = FlowAnalyzer::new().analyze(&method).unwrap();
        let top = analysis.frame(7).unwrap().peek(0).unwrap().clone();
        let FlowValue::Merged { slot, .. } = &top else { panic!("expected a merge, got {top:?}") };
        assert_eq!(slot.insn, 6);
        assert_eq!(analysis.merges.members(slot).len(), 2);
        assert!(analysis.is_trackable(&top, &mut HashMap::new()));
    }

    #[test]
    fn test_height_mismatch() {
        let method = Method::new("demo/A", "f", "(Z)V", true).unwrap().with_insns(vec![
            Insn::Load(0),
            Insn::If { cond: Cond::Eq, target: 1 },
            Insn::Const(Constant::Int(1)),
            Insn::Label(1),
            Insn::Return(Type::Void),
        ]);
        assert_eq!(
            FlowAnalyzer::new().analyze(&method).err(),
            Some(WeaveError::StackHeightMismatch { insn: 3, expected: 0, found: 1 })
        );
    }

    #[test]
    fn test_iteration_cap() {
        let method = Method::new("demo/A", "spin", "()V", true)
            .unwrap()
            .with_insns(vec![Insn::Label(0), Insn::Nop, Insn::Goto(0)]);
        let analysis = FlowAnalyzer::new().with_max_iterations(2).analyze(&method);
        assert_eq!(analysis.err(), Some(WeaveError::NoConvergence { iterations: 2 }));
    }

    #[test]
    fn test_unreachable_frames_are_none() {
        let method = Method::new("demo/A", "f", "()V", true)
            .unwrap()
            .with_insns(vec![Insn::Return(Type::Void), Insn::Nop, Insn::Return(Type::Void)]);
        let analysis = FlowAnalyzer::new().analyze(&method).unwrap();
        assert!(analysis.frame(0).is_some());
        assert!(analysis.frame(1).is_none());
    }
}
