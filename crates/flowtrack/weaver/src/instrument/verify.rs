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

//! Structural check of a method body, hooks included

use crate::analysis::ControlFlowGraph;
use crate::error::{WeaveError, WeaveResult};
use crate::ir::Method;
use std::collections::VecDeque;

/// Stack depth the method needs, checking heights agree at joins and locals are in range
pub fn required_stack(method: &Method) -> WeaveResult<usize> {
    let cfg = ControlFlowGraph::from_method(method)?;
    let mut heights: Vec<Option<usize>> = vec![None; method.insns.len()];
    let mut queue = VecDeque::from([0]);
    let mut max = 0;
    heights[0] = Some(0);

    while let Some(index) = queue.pop_front() {
        let insn = &method.insns[index];
        let height = heights[index].unwrap_or(0);
        if let Some(local) = insn.local_index() {
            if local >= method.max_locals {
                return Err(WeaveError::InvalidLocal { insn: index, index: local, max_locals: method.max_locals });
            }
        }
        let (pops, pushes) = insn.stack_effect();
        let after = height.checked_sub(pops).ok_or(WeaveError::StackUnderflow { insn: index })? + pushes;
        max = max.max(height).max(after);

        for &successor in &cfg.successors[index] {
            match heights[successor] {
                None => {
                    heights[successor] = Some(after);
                    queue.push_back(successor);
                }
                Some(existing) if existing != after => {
                    return Err(WeaveError::StackHeightMismatch { insn: successor, expected: existing, found: after });
                }
                Some(_) => {}
            }
        }
    }
    Ok(max)
}
