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

//! Property tests for the part algebra

use flowtrack_core::{Tracker, TrackerPoint};
use proptest::prelude::*;
use std::sync::Arc;

proptest! {
    #[test]
    fn contiguous_writes_compact_to_one_part(
        start in 0usize..64,
        source_start in 0usize..1024,
        lengths in prop::collection::vec(1usize..8, 1..12),
    ) {
        let source = Tracker::origin();
        let target = Tracker::new_default();
        let mut offset = 0;
        for length in &lengths {
            target.set_source(start + offset, *length, Some(&source), source_start + offset).unwrap();
            offset += length;
        }
        prop_assert_eq!(target.part_count(), 1);
        let (part_start, part) = target.entry_at(start).unwrap();
        prop_assert_eq!(part_start, start);
        prop_assert_eq!(part.length, offset);
        prop_assert_eq!(part.source_index, source_start);
    }

    #[test]
    fn contiguous_writes_in_reverse_order_compact_too(
        source_start in 0usize..1024,
        lengths in prop::collection::vec(1usize..8, 1..12),
    ) {
        let source = Tracker::origin();
        let target = Tracker::new_default();
        let total: usize = lengths.iter().sum();
        let mut end = total;
        for length in &lengths {
            end -= length;
            target.set_source(end, *length, Some(&source), source_start + end).unwrap();
        }
        prop_assert_eq!(target.part_count(), 1);
        prop_assert_eq!(target.len(), total);
    }

    #[test]
    fn last_write_wins_per_index(
        writes in prop::collection::vec((0usize..32, 1usize..8, any::<bool>()), 1..20),
    ) {
        let sources = [Tracker::origin(), Tracker::origin()];
        let target = Tracker::new_default();
        // expected provenance per index: (source number, source index)
        let mut expected: Vec<Option<(usize, usize)>> = vec![None; 40];
        for (round, (index, length, first)) in writes.iter().enumerate() {
            let which = if *first { 0 } else { 1 };
            let source_index = round * 100;
            target.set_source(*index, *length, Some(&sources[which]), source_index).unwrap();
            for i in 0..*length {
                expected[index + i] = Some((which, source_index + i));
            }
        }
        for (i, slot) in expected.iter().enumerate() {
            let actual = TrackerPoint::of(&target, i);
            match slot {
                Some((which, source_index)) => {
                    let point = actual.unwrap();
                    prop_assert!(Arc::ptr_eq(point.tracker(), &sources[*which]));
                    prop_assert_eq!(point.index(), *source_index);
                }
                None => prop_assert!(actual.is_none()),
            }
        }
        // parts never overlap and are ordered
        let parts = target.parts();
        for pair in parts.windows(2) {
            prop_assert!(pair[0].0 + pair[0].1.length <= pair[1].0);
        }
    }
}
