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

//! Abstract frames: locals and operand stack at one instruction

use super::value::FlowValue;
use crate::error::{WeaveError, WeaveResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    locals: Vec<FlowValue>,
    stack: Vec<FlowValue>,
}

impl Frame {
    pub fn new(max_locals: u16) -> Self {
        Self { locals: vec![FlowValue::Untrackable(None); usize::from(max_locals)], stack: Vec::new() }
    }

    pub fn locals(&self) -> &[FlowValue] {
        &self.locals
    }

    pub fn stack(&self) -> &[FlowValue] {
        &self.stack
    }

    pub(crate) fn locals_mut(&mut self) -> &mut [FlowValue] {
        &mut self.locals
    }

    pub(crate) fn stack_mut(&mut self) -> &mut [FlowValue] {
        &mut self.stack
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Value `depth` slots below the top of the stack
    pub fn peek(&self, depth: usize) -> Option<&FlowValue> {
        self.stack.len().checked_sub(depth + 1).and_then(|index| self.stack.get(index))
    }

    pub fn push(&mut self, value: FlowValue) {
        self.stack.push(value);
    }

    pub fn pop(&mut self, insn: usize) -> WeaveResult<FlowValue> {
        self.stack.pop().ok_or(WeaveError::StackUnderflow { insn })
    }

    /// Pops `count` values, returned bottom first
    pub fn pop_n(&mut self, insn: usize, count: usize) -> WeaveResult<Vec<FlowValue>> {
        let start = self.stack.len().checked_sub(count).ok_or(WeaveError::StackUnderflow { insn })?;
        Ok(self.stack.split_off(start))
    }

    pub fn local(&self, insn: usize, index: u16) -> WeaveResult<&FlowValue> {
        self.locals.get(usize::from(index)).ok_or(WeaveError::InvalidLocal {
            insn,
            index,
            max_locals: self.locals.len() as u16,
        })
    }

    pub fn set_local(&mut self, insn: usize, index: u16, value: FlowValue) -> WeaveResult<()> {
        let max_locals = self.locals.len() as u16;
        let slot = self
            .locals
            .get_mut(usize::from(index))
            .ok_or(WeaveError::InvalidLocal { insn, index, max_locals })?;
        *slot = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Type;

    #[test]
    fn test_stack_operations() {
        let mut frame = Frame::new(1);
        frame.push(FlowValue::untrackable(Type::Int));
        frame.push(FlowValue::untrackable(Type::Char));
        assert_eq!(frame.peek(0), Some(&FlowValue::untrackable(Type::Char)));
        assert_eq!(frame.peek(2), None);
        let popped = frame.pop_n(0, 2).unwrap();
        assert_eq!(popped[0], FlowValue::untrackable(Type::Int));
        assert_eq!(frame.pop(7), Err(WeaveError::StackUnderflow { insn: 7 }));
    }

    #[test]
    fn test_local_bounds() {
        let mut frame = Frame::new(2);
        assert!(frame.set_local(0, 1, FlowValue::untrackable(Type::Int)).is_ok());
        assert_eq!(
            frame.local(3, 2).err(),
            Some(WeaveError::InvalidLocal { insn: 3, index: 2, max_locals: 2 })
        );
    }
}
