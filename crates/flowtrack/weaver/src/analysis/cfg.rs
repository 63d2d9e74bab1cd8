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

//! Instruction-level control flow graph

use crate::error::{WeaveError, WeaveResult};
use crate::ir::{Insn, LabelId, Method};
use std::collections::{HashMap, VecDeque};

/// Successor and predecessor edges between instruction indices
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    /// Successors of each instruction, jump target first
    pub successors: Vec<Vec<usize>>,
    /// Predecessors of each instruction
    pub predecessors: Vec<Vec<usize>>,
    /// Whether each instruction is reachable from the entry
    pub reachable: Vec<bool>,
    labels: HashMap<LabelId, usize>,
}

impl ControlFlowGraph {
    /// Build a CFG from a method body
    pub fn from_method(method: &Method) -> WeaveResult<Self> {
        if method.insns.is_empty() {
            return Err(WeaveError::FallsOffEnd { insn: 0 });
        }
        let count = method.insns.len();
        let mut cfg = Self {
            successors: vec![Vec::new(); count],
            predecessors: vec![Vec::new(); count],
            reachable: vec![false; count],
            labels: method.label_positions()?,
        };
        let falls_off = cfg.compute_edges(&method.insns)?;
        cfg.mark_reachable();
        if let Some(insn) = falls_off.into_iter().find(|insn| cfg.reachable[*insn]) {
            return Err(WeaveError::FallsOffEnd { insn });
        }
        Ok(cfg)
    }

    /// Compute edges, returning the instructions that fall through past the end
    fn compute_edges(&mut self, insns: &[Insn]) -> WeaveResult<Vec<usize>> {
        let mut falls_off = Vec::new();
        for (index, insn) in insns.iter().enumerate() {
            if let Some(label) = insn.jump_target() {
                let target = *self.labels.get(&label).ok_or(WeaveError::UnknownLabel { insn: index, label })?;
                self.add_edge(index, target);
            }
            if insn.falls_through() {
                if index + 1 < insns.len() {
                    self.add_edge(index, index + 1);
                } else {
                    falls_off.push(index);
                }
            }
        }
        Ok(falls_off)
    }

    fn add_edge(&mut self, from: usize, to: usize) {
        if !self.successors[from].contains(&to) {
            self.successors[from].push(to);
            self.predecessors[to].push(from);
        }
    }

    /// Mark reachable instructions starting from the entry
    fn mark_reachable(&mut self) {
        let mut queue = VecDeque::new();
        self.reachable[0] = true;
        queue.push_back(0);

        while let Some(index) = queue.pop_front() {
            for &successor in &self.successors[index] {
                if !self.reachable[successor] {
                    self.reachable[successor] = true;
                    queue.push_back(successor);
                }
            }
        }
    }

    pub fn label_position(&self, label: LabelId) -> Option<usize> {
        self.labels.get(&label).copied()
    }

    pub fn len(&self) -> usize {
        self.successors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.successors.is_empty()
    }

    /// True if more than one edge enters the instruction
    pub fn is_join(&self, index: usize) -> bool {
        self.predecessors.get(index).is_some_and(|preds| preds.len() + usize::from(index == 0) > 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Cond, Constant, Type};

    fn method(insns: Vec<Insn>) -> Method {
        Method::new("demo/A", "f", "(I)V", true).unwrap().with_insns(insns)
    }

    #[test]
    fn test_branch_edges() {
        let method = method(vec![
            Insn::Load(0),
            Insn::If { cond: Cond::Eq, target: 1 },
            Insn::Nop,
            Insn::Label(1),
            Insn::Return(Type::Void),
        ]);
        let cfg = ControlFlowGraph::from_method(&method).unwrap();
        assert_eq!(cfg.successors[1], vec![3, 2]);
        assert_eq!(cfg.predecessors[3], vec![1, 2]);
        assert!(cfg.is_join(3));
        assert!(!cfg.is_join(2));
        assert!(cfg.reachable.iter().all(|r| *r));
    }

    #[test]
    fn test_unreachable_code_is_marked() {
        let method = method(vec![Insn::Goto(0), Insn::Nop, Insn::Label(0), Insn::Return(Type::Void)]);
        let cfg = ControlFlowGraph::from_method(&method).unwrap();
        assert_eq!(cfg.reachable, vec![true, false, true, true]);
    }

    #[test]
    fn test_falls_off_end() {
        let method = method(vec![Insn::Const(Constant::Int(1)), Insn::Pop]);
        assert_eq!(ControlFlowGraph::from_method(&method).err(), Some(WeaveError::FallsOffEnd { insn: 1 }));
    }

    #[test]
    fn test_unreachable_tail_may_fall_off() {
        let method = method(vec![Insn::Return(Type::Void), Insn::Nop]);
        assert!(ControlFlowGraph::from_method(&method).is_ok());
    }

    #[test]
    fn test_unknown_label() {
        let method = method(vec![Insn::Goto(9)]);
        assert_eq!(
            ControlFlowGraph::from_method(&method).err(),
            Some(WeaveError::UnknownLabel { insn: 0, label: 9 })
        );
    }
}
