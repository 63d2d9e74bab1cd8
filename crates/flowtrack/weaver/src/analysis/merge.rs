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

//! Merging values at control-flow joins
//!
//! A merge is identified by where it lives: the join instruction plus the local or
//! stack slot. Its members are kept in a [`MergeIndex`] arena instead of inside the
//! value, so values stay cheap to compare and a merge can grow as the solver revisits
//! the join.

use super::value::{merge_types, FlowValue};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotKind {
    Local,
    Stack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MergeSlot {
    pub insn: usize,
    pub kind: SlotKind,
    pub index: usize,
}

impl MergeSlot {
    pub fn local(insn: usize, index: usize) -> Self {
        Self { insn, kind: SlotKind::Local, index }
    }

    pub fn stack(insn: usize, index: usize) -> Self {
        Self { insn, kind: SlotKind::Stack, index }
    }
}

#[derive(Debug, Default, Clone)]
pub struct MergeIndex {
    members: HashMap<MergeSlot, Vec<FlowValue>>,
}

impl MergeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn members(&self, slot: &MergeSlot) -> &[FlowValue] {
        self.members.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn slots(&self) -> impl Iterator<Item = &MergeSlot> {
        self.members.keys()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Merges two values meeting in `slot`
    pub fn merge(&mut self, slot: MergeSlot, v1: &FlowValue, v2: &FlowValue) -> FlowValue {
        if v1 == v2 {
            return v1.clone();
        }
        let ty = merge_types(v1.ty(), v2.ty());
        if v1.may_be_trackable() && v2.may_be_trackable() {
            if let Some(merged) = self.merge_in_place(v1, v2) {
                return merged;
            }
            if let Some(ty) = ty.clone() {
                if self.merge_at(slot, v1, v2) {
                    return FlowValue::Merged { ty, slot };
                }
            }
        }
        FlowValue::Untrackable(ty)
    }

    /// Returns whichever value already covers the other
    fn merge_in_place(&self, v1: &FlowValue, v2: &FlowValue) -> Option<FlowValue> {
        if v1 == v2 || self.covers(v1, v2) {
            Some(v1.clone())
        } else if self.covers(v2, v1) {
            Some(v2.clone())
        } else {
            None
        }
    }

    /// True if `merged` is a merge whose members include `value`, or all of `value`'s members.
    /// Copies and casts made by the same instruction cover each other when their sources do.
    fn covers(&self, merged: &FlowValue, value: &FlowValue) -> bool {
        match (merged, value) {
            (FlowValue::Copy { insn, original }, FlowValue::Copy { insn: other, original: source }) if insn == other => {
                original == source || self.covers(original, source)
            }
            (
                FlowValue::Cast { ty, insn, target },
                FlowValue::Cast { ty: other_ty, insn: other, target: source },
            ) if insn == other && ty == other_ty => target == source || self.covers(target, source),
            (FlowValue::Merged { slot, .. }, _) => {
                let members = self.members(slot);
                if members.contains(value) {
                    return true;
                }
                match value {
                    FlowValue::Merged { slot: other, .. } => {
                        let others = self.members(other);
                        !others.is_empty() && others.iter().all(|member| members.contains(member))
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Adds both values to the merge living in `slot`; false if that is not possible
    fn merge_at(&mut self, slot: MergeSlot, v1: &FlowValue, v2: &FlowValue) -> bool {
        let is_here = |value: &FlowValue| matches!(value, FlowValue::Merged { slot: s, .. } if *s == slot);
        let foreign_merge = |value: &FlowValue| matches!(value, FlowValue::Merged { .. }) && !is_here(value);

        let mut members = self.members.remove(&slot).unwrap_or_default();
        if members.is_empty() {
            members.extend([v1, v2].into_iter().filter(|v| !is_here(v)).cloned());
        } else if foreign_merge(v1) || foreign_merge(v2) {
            self.members.insert(slot, members);
            return false;
        } else {
            for value in [v1, v2] {
                if is_here(value) {
                    continue;
                }
                if let Some(position) = members.iter().position(|m| self.merge_in_place(m, value).is_some()) {
                    if let Some(combined) = self.merge_in_place(&members[position], value) {
                        members[position] = combined;
                    }
                } else {
                    members.push(value.clone());
                }
            }
        }
        self.members.insert(slot, members);
        true
    }

    /// Final trackability, once the analysis has converged
    ///
    /// A merge is trackable when every member is trackable and has a creation site.
    /// A merge that reaches itself again through its members is not.
    pub fn is_trackable(&self, value: &FlowValue, memo: &mut HashMap<MergeSlot, bool>) -> bool {
        self.trackable(value, memo, &mut HashSet::new())
    }

    fn trackable(&self, value: &FlowValue, memo: &mut HashMap<MergeSlot, bool>, visiting: &mut HashSet<MergeSlot>) -> bool {
        match value {
            FlowValue::Untrackable(_) => false,
            FlowValue::Cast { target, .. } => self.trackable(target, memo, visiting),
            FlowValue::Copy { original, .. } => self.trackable(original, memo, visiting),
            FlowValue::Merged { slot, .. } => {
                if let Some(known) = memo.get(slot) {
                    return *known;
                }
                if !visiting.insert(*slot) {
                    return false;
                }
                let members = self.members(slot);
                let result = !members.is_empty()
                    && members
                        .iter()
                        .all(|member| member.creation_insn().is_some() && self.trackable(member, memo, visiting));
                visiting.remove(slot);
                memo.insert(*slot, result);
                result
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Type;

    fn load(insn: usize) -> FlowValue {
        FlowValue::ArrayElementLoad { ty: Type::Char, insn }
    }

    #[test]
    fn test_merge_two_definitions() {
        let mut index = MergeIndex::new();
        let slot = MergeSlot::local(10, 1);
        let merged = index.merge(slot, &load(2), &load(5));
        assert_eq!(merged, FlowValue::Merged { ty: Type::Char, slot });
        assert_eq!(index.members(&slot), &[load(2), load(5)]);
    }

    #[test]
    fn test_remerge_same_join_is_stable() {
        let mut index = MergeIndex::new();
        let slot = MergeSlot::local(10, 1);
        let merged = index.merge(slot, &load(2), &load(5));
        assert_eq!(index.merge(slot, &merged, &load(5)), merged);
        assert_eq!(index.merge(slot, &merged, &load(7)), merged);
        assert_eq!(index.members(&slot), &[load(2), load(5), load(7)]);
    }

    #[test]
    fn test_superset_from_other_join_is_kept() {
        let mut index = MergeIndex::new();
        let inner = MergeSlot::local(10, 1);
        let outer = MergeSlot::local(20, 1);
        let small = index.merge(inner, &load(2), &load(5));
        let big = index.merge(outer, &small, &load(7));
        // big holds `small` itself as a member
        assert_eq!(index.merge(MergeSlot::local(30, 1), &big, &small), big);
    }

    #[test]
    fn test_untrackable_member_poisons_merge() {
        let mut index = MergeIndex::new();
        let slot = MergeSlot::stack(4, 0);
        let merged = index.merge(slot, &load(1), &FlowValue::untrackable(Type::Char));
        assert_eq!(merged, FlowValue::Untrackable(Some(Type::Char)));
    }

    #[test]
    fn test_member_without_creation_site_is_not_trackable() {
        let mut index = MergeIndex::new();
        let slot = MergeSlot::local(8, 2);
        let merged = index.merge(slot, &load(1), &FlowValue::CallArgument { ty: Type::Char, arg: 0 });
        assert!(matches!(merged, FlowValue::Merged { .. }));
        assert!(!index.is_trackable(&merged, &mut HashMap::new()));
    }

    #[test]
    fn test_self_containing_merge_is_not_trackable() {
        let mut index = MergeIndex::new();
        let slot = MergeSlot::local(3, 0);
        let merged = index.merge(slot, &load(1), &load(2));
        let looped = FlowValue::copy(6, &merged);
        assert_eq!(index.merge(slot, &merged, &looped), merged);
        assert!(!index.is_trackable(&merged, &mut HashMap::new()));
    }

    #[test]
    fn test_plain_merge_is_trackable() {
        let mut index = MergeIndex::new();
        let slot = MergeSlot::local(3, 0);
        let merged = index.merge(slot, &load(1), &load(2));
        assert!(index.is_trackable(&FlowValue::copy(9, &merged), &mut HashMap::new()));
    }

    #[test]
    fn test_copy_of_merge_covers_copy_of_member() {
        let mut index = MergeIndex::new();
        let join = MergeSlot::local(4, 3);
        let constant = FlowValue::copy(1, &FlowValue::Constant { ty: Type::Char, insn: 0, value: 'x' as i64 });
        let merged = index.merge(join, &constant, &FlowValue::copy(11, &load(10)));

        // first pass saw only the constant, a later one the merge
        let early = FlowValue::copy(20, &constant);
        let late = FlowValue::copy(20, &merged);
        let downstream = MergeSlot::stack(21, 2);
        assert_eq!(index.merge(downstream, &early, &late), late);
        assert_eq!(index.merge(downstream, &late, &early), late);
        assert!(index.members(&downstream).is_empty());
    }

    #[test]
    fn test_copies_from_different_insns_still_merge() {
        let mut index = MergeIndex::new();
        let slot = MergeSlot::local(12, 0);
        let merged = index.merge(slot, &FlowValue::copy(3, &load(2)), &FlowValue::copy(7, &load(2)));
        assert!(matches!(merged, FlowValue::Merged { .. }));
        assert_eq!(index.members(&slot).len(), 2);
    }
}
