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

//! Trackers
//!
//! A [`Tracker`] is the provenance ledger of one tracked object. Its parts map
//! ranges of the object onto ranges of other trackers. Content-holding trackers
//! (origin, sink, fixed) are where data comes from; default and sink trackers
//! record where their data was copied from.

use crate::error::{TrackerError, TrackerResult};
use crate::point::TrackerPoint;
use crate::snapshot::{SnapshotPart, TrackerSnapshot};
use crate::twin::TwinSync;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

static NEXT_TRACKER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackerId(u64);

impl TrackerId {
    fn next() -> Self {
        TrackerId(NEXT_TRACKER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Behavioral role of a tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerRole {
    /// Created lazily for a tracked object; only records parts
    Default,
    /// Data originates here; the tracker is its own content
    Origin,
    /// Data is written here; holds content and records parts
    Sink,
    /// Content set once at creation and frozen
    Fixed,
    /// No content, a naming placeholder
    Tag,
}

impl TrackerRole {
    /// Whether the parts of this tracker can change after creation.
    /// Copies from such a tracker are resolved to its sources immediately.
    pub fn is_content_mutable(self) -> bool {
        matches!(self, TrackerRole::Default | TrackerRole::Sink)
    }

    pub fn accepts_content(self) -> bool {
        matches!(self, TrackerRole::Origin | TrackerRole::Sink)
    }

    pub fn has_content(self) -> bool {
        matches!(self, TrackerRole::Origin | TrackerRole::Sink | TrackerRole::Fixed)
    }
}

impl fmt::Display for TrackerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackerRole::Default => "default",
            TrackerRole::Origin => "origin",
            TrackerRole::Sink => "sink",
            TrackerRole::Fixed => "fixed",
            TrackerRole::Tag => "tag",
        };
        f.write_str(name)
    }
}

/// A contiguous range of a tracker that came from a contiguous range of `source`.
/// The local start index is the key under which the part is stored.
#[derive(Debug, Clone)]
pub struct Part {
    pub length: usize,
    pub source: Arc<Tracker>,
    pub source_index: usize,
}

impl Part {
    /// True if `next`, placed right after this part, continues the same source range
    fn continues_into(&self, next: &Part) -> bool {
        Arc::ptr_eq(&self.source, &next.source) && self.source_index + self.length == next.source_index
    }

    fn tail_from(&self, start: usize, from: usize) -> Part {
        Part {
            length: start + self.length - from,
            source: self.source.clone(),
            source_index: self.source_index + (from - start),
        }
    }
}

/// A resolved piece of a source range; `source` is None for a gap
#[derive(Debug, Clone)]
pub(crate) struct Segment {
    pub offset: usize,
    pub length: usize,
    pub source: Option<Arc<Tracker>>,
    pub source_index: usize,
}

#[derive(Default)]
struct TrackerState {
    parts: BTreeMap<usize, Part>,
    content: Vec<u8>,
    descriptor: Option<String>,
    twin: Option<Weak<Tracker>>,
    twin_sync: Option<Arc<TwinSync>>,
}

impl TrackerState {
    /// Removes everything known about `[index, end)`, splitting parts that straddle a boundary
    fn clear_range(&mut self, index: usize, end: usize) {
        let straddling = self
            .parts
            .range(..index)
            .next_back()
            .filter(|(start, part)| **start + part.length > index)
            .map(|(start, part)| (*start, part.clone()));
        if let Some((start, part)) = straddling {
            if start + part.length > end {
                self.parts.insert(end, part.tail_from(start, end));
            }
            if let Some(head) = self.parts.get_mut(&start) {
                head.length = index - start;
            }
        }

        let inside: Vec<usize> = self.parts.range(index..end).map(|(start, _)| *start).collect();
        for start in inside {
            if let Some(part) = self.parts.remove(&start) {
                if start + part.length > end {
                    self.parts.insert(end, part.tail_from(start, end));
                }
            }
        }
    }

    fn set_source(&mut self, index: usize, length: usize, source: Option<Arc<Tracker>>, source_index: usize) {
        if length == 0 {
            return;
        }
        let end = index + length;
        self.clear_range(index, end);

        let Some(source) = source else {
            return;
        };
        let mut start = index;
        let mut part = Part { length, source, source_index };

        let previous = self
            .parts
            .range(..index)
            .next_back()
            .filter(|(prev_start, prev)| **prev_start + prev.length == index && prev.continues_into(&part))
            .map(|(prev_start, prev)| (*prev_start, prev.clone()));
        if let Some((prev_start, prev)) = previous {
            start = prev_start;
            part = Part {
                length: prev.length + part.length,
                source: prev.source,
                source_index: prev.source_index,
            };
        }

        if let Some(next) = self.parts.get(&end) {
            if part.continues_into(next) {
                part.length += next.length;
                self.parts.remove(&end);
            }
        }

        self.parts.insert(start, part);
    }
}

pub struct Tracker {
    id: TrackerId,
    role: TrackerRole,
    state: RwLock<TrackerState>,
}

impl Tracker {
    fn with_role(role: TrackerRole, content: Vec<u8>, descriptor: Option<String>) -> Arc<Self> {
        Arc::new(Tracker {
            id: TrackerId::next(),
            role,
            state: RwLock::new(TrackerState {
                content,
                descriptor,
                ..TrackerState::default()
            }),
        })
    }

    /// Tracker created on demand for an object that data gets copied into
    pub fn new_default() -> Arc<Self> {
        Self::with_role(TrackerRole::Default, Vec::new(), None)
    }

    pub fn origin() -> Arc<Self> {
        Self::with_role(TrackerRole::Origin, Vec::new(), None)
    }

    pub fn sink() -> Arc<Self> {
        Self::with_role(TrackerRole::Sink, Vec::new(), None)
    }

    /// Tracker over already-known content. `point(i)` resolves to the tracker itself for
    /// every index inside the content.
    pub fn fixed(content: impl Into<Vec<u8>>) -> Arc<Self> {
        Self::with_role(TrackerRole::Fixed, content.into(), None)
    }

    pub fn tag(name: impl Into<String>) -> Arc<Self> {
        Self::with_role(TrackerRole::Tag, Vec::new(), Some(name.into()))
    }

    /// Creates the read (origin) and write (sink) trackers of one bidirectional channel,
    /// already linked as twins.
    pub fn twins(descriptor: &str) -> (Arc<Self>, Arc<Self>) {
        let origin = Self::with_role(TrackerRole::Origin, Vec::new(), Some(format!("{descriptor} (in)")));
        let sink = Self::with_role(TrackerRole::Sink, Vec::new(), Some(format!("{descriptor} (out)")));
        let sync = Arc::new(TwinSync::new(origin.id, sink.id));
        Self::link(&origin, &sink, sync);
        (origin, sink)
    }

    /// Links two existing trackers as twins. Fails without touching either tracker if one of
    /// them already has a twin.
    pub fn init_twin(first: &Arc<Tracker>, second: &Arc<Tracker>) -> TrackerResult<Arc<TwinSync>> {
        if Arc::ptr_eq(first, second) {
            return Err(TrackerError::SelfTwin);
        }
        // lock in id order so two concurrent links cannot deadlock
        let (low, high) = if first.id < second.id { (first, second) } else { (second, first) };
        let mut low_state = low.state.write();
        let mut high_state = high.state.write();
        if low_state.twin.is_some() {
            return Err(TrackerError::TwinAlreadySet(low.id));
        }
        if high_state.twin.is_some() {
            return Err(TrackerError::TwinAlreadySet(high.id));
        }
        let sync = Arc::new(TwinSync::new(first.id, second.id));
        low_state.twin = Some(Arc::downgrade(high));
        low_state.twin_sync = Some(sync.clone());
        high_state.twin = Some(Arc::downgrade(low));
        high_state.twin_sync = Some(sync.clone());
        Ok(sync)
    }

    fn link(first: &Arc<Tracker>, second: &Arc<Tracker>, sync: Arc<TwinSync>) {
        {
            let mut state = first.state.write();
            state.twin = Some(Arc::downgrade(second));
            state.twin_sync = Some(sync.clone());
        }
        let mut state = second.state.write();
        state.twin = Some(Arc::downgrade(first));
        state.twin_sync = Some(sync);
    }

    pub fn id(&self) -> TrackerId {
        self.id
    }

    pub fn role(&self) -> TrackerRole {
        self.role
    }

    pub fn descriptor(&self) -> Option<String> {
        self.state.read().descriptor.clone()
    }

    pub fn set_descriptor(&self, descriptor: impl Into<String>) {
        self.state.write().descriptor = Some(descriptor.into());
    }

    pub fn twin(&self) -> Option<Arc<Tracker>> {
        self.state.read().twin.as_ref().and_then(Weak::upgrade)
    }

    pub fn twin_sync(&self) -> Option<Arc<TwinSync>> {
        self.state.read().twin_sync.clone()
    }

    /// Known length. For content-holding trackers the content length, for default trackers
    /// the end of the last part, zero for tags.
    pub fn len(&self) -> usize {
        let state = self.state.read();
        match self.role {
            TrackerRole::Origin | TrackerRole::Sink | TrackerRole::Fixed => state.content.len(),
            TrackerRole::Default => state
                .parts
                .iter()
                .next_back()
                .map(|(start, part)| start + part.length)
                .unwrap_or(0),
            TrackerRole::Tag => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn content(&self) -> Vec<u8> {
        self.state.read().content.clone()
    }

    /// Content as text, for trackers whose content is text (constant tables)
    pub fn content_text(&self) -> String {
        String::from_utf8_lossy(&self.state.read().content).into_owned()
    }

    /// Grows the content of an origin or sink tracker
    pub fn append(&self, data: &[u8]) -> TrackerResult<()> {
        if !self.role.accepts_content() {
            return Err(TrackerError::NotAppendable { id: self.id, role: self.role });
        }
        if let Some(sync) = self.twin_sync() {
            // lengths are read before taking our own write lock; the twin may be appending too
            let other_len = self.twin().map(|twin| twin.len()).unwrap_or(0);
            sync.before_append(self.id, self.len(), other_len);
        }
        self.state.write().content.extend_from_slice(data);
        Ok(())
    }

    /// Records that `[index, index + length)` of this tracker came from
    /// `source[source_index, source_index + length)`. A `None` source records a gap.
    ///
    /// When the source is itself mutable, its current parts are copied instead of a
    /// reference to it, so later changes to the source do not change this tracker.
    pub fn set_source(
        &self,
        index: usize,
        length: usize,
        source: Option<&Arc<Tracker>>,
        source_index: usize,
    ) -> TrackerResult<()> {
        if !self.role.is_content_mutable() {
            return Err(TrackerError::Immutable { id: self.id, role: self.role });
        }
        if length == 0 {
            return Ok(());
        }
        trace!(tracker = %self.id, index, length, source = ?source.map(|s| s.id), source_index, "set_source");
        match source {
            Some(source) if source.role.is_content_mutable() => {
                // resolved under the source's read lock, applied under ours; also covers self-copies
                let segments = source.resolve_range(source_index, length);
                let mut state = self.state.write();
                for segment in segments {
                    state.set_source(index + segment.offset, segment.length, segment.source, segment.source_index);
                }
            }
            other => self.state.write().set_source(index, length, other.cloned(), source_index),
        }
        Ok(())
    }

    /// `set_source` for a single resolved point
    pub fn set_source_point(&self, index: usize, length: usize, point: Option<&TrackerPoint>) -> TrackerResult<()> {
        match point {
            Some(point) => self.set_source(index, length, Some(point.tracker()), point.index()),
            None => self.set_source(index, length, None, 0),
        }
    }

    /// Splits `[start, start + length)` into the parts and gaps that cover it
    pub(crate) fn resolve_range(&self, start: usize, length: usize) -> Vec<Segment> {
        let end = start + length;
        let state = self.state.read();
        let mut segments = Vec::new();
        let mut cursor = start;

        let first = state
            .parts
            .range(..start)
            .next_back()
            .filter(|(part_start, part)| **part_start + part.length > start);
        for (&part_start, part) in first.into_iter().chain(state.parts.range(start..end)) {
            let from = part_start.max(cursor);
            let to = (part_start + part.length).min(end);
            if from > cursor {
                segments.push(Segment { offset: cursor - start, length: from - cursor, source: None, source_index: 0 });
            }
            segments.push(Segment {
                offset: from - start,
                length: to - from,
                source: Some(part.source.clone()),
                source_index: part.source_index + (from - part_start),
            });
            cursor = to;
        }
        if cursor < end {
            segments.push(Segment { offset: cursor - start, length: end - cursor, source: None, source_index: 0 });
        }
        segments
    }

    /// The part covering `index` with its start, or None for a gap
    pub fn entry_at(&self, index: usize) -> Option<(usize, Part)> {
        self.state
            .read()
            .parts
            .range(..=index)
            .next_back()
            .filter(|(start, part)| **start + part.length > index)
            .map(|(start, part)| (*start, part.clone()))
    }

    pub fn parts(&self) -> Vec<(usize, Part)> {
        self.state.read().parts.iter().map(|(start, part)| (*start, part.clone())).collect()
    }

    pub fn part_count(&self) -> usize {
        self.state.read().parts.len()
    }

    /// Resolves `index` to the deepest known provenance point
    pub fn point(self: &Arc<Self>, index: usize) -> Option<TrackerPoint> {
        TrackerPoint::of(self, index)
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.state.read();
        let mut parts = Vec::with_capacity(state.parts.len());
        let mut cursor = 0;
        for (&start, part) in &state.parts {
            if start > cursor {
                parts.push(SnapshotPart::gap(start - cursor));
            }
            parts.push(SnapshotPart {
                length: part.length,
                source: Some(part.source.id),
                source_index: part.source_index,
            });
            cursor = start + part.length;
        }
        TrackerSnapshot { parts }
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("descriptor", &self.state.read().descriptor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(target: &Arc<Tracker>, index: usize, length: usize, source: &Arc<Tracker>, source_index: usize) {
        target.set_source(index, length, Some(source), source_index).unwrap();
    }

    fn snapshot() -> TrackerSnapshot {
        TrackerSnapshot::new()
    }

    #[test]
    fn test_single_part_after_gap() {
        let source = Tracker::origin();
        let target = Tracker::new_default();
        set(&target, 5, 3, &source, 105);
        assert_eq!(target.snapshot(), snapshot().gap(5).part(3, &source, 105));
        assert_eq!(target.len(), 8);
    }

    #[test]
    fn test_merge_with_previous() {
        let source = Tracker::origin();
        let target = Tracker::new_default();
        set(&target, 5, 3, &source, 105);
        set(&target, 8, 2, &source, 108);
        assert_eq!(target.snapshot(), snapshot().gap(5).part(5, &source, 105));
        assert_eq!(target.part_count(), 1);
    }

    #[test]
    fn test_no_merge_when_source_skips() {
        let source = Tracker::origin();
        let target = Tracker::new_default();
        set(&target, 5, 3, &source, 105);
        set(&target, 8, 2, &source, 109);
        assert_eq!(
            target.snapshot(),
            snapshot().gap(5).part(3, &source, 105).part(2, &source, 109)
        );
    }

    #[test]
    fn test_merge_with_next() {
        let source = Tracker::origin();
        let target = Tracker::new_default();
        set(&target, 5, 3, &source, 105);
        set(&target, 3, 2, &source, 103);
        assert_eq!(target.snapshot(), snapshot().gap(3).part(5, &source, 103));
    }

    #[test]
    fn test_no_merge_with_different_source() {
        let source = Tracker::origin();
        let other = Tracker::origin();
        let target = Tracker::new_default();
        set(&target, 0, 3, &source, 3);
        set(&target, 3, 3, &other, 6);
        assert_eq!(target.snapshot(), snapshot().part(3, &source, 3).part(3, &other, 6));
    }

    #[test]
    fn test_fill_hole_merges_three_parts() {
        let source = Tracker::origin();
        let target = Tracker::new_default();
        set(&target, 0, 2, &source, 10);
        set(&target, 4, 3, &source, 14);
        set(&target, 2, 2, &source, 12);
        assert_eq!(target.snapshot(), snapshot().part(7, &source, 10));
    }

    #[test]
    fn test_overlap_overwrites_end_of_previous() {
        let source = Tracker::origin();
        let other = Tracker::origin();
        let target = Tracker::new_default();
        set(&target, 5, 3, &source, 105);
        set(&target, 6, 4, &other, 106);
        assert_eq!(
            target.snapshot(),
            snapshot().gap(5).part(1, &source, 105).part(4, &other, 106)
        );
    }

    #[test]
    fn test_overwrite_middle_splits_part() {
        let source = Tracker::origin();
        let other = Tracker::origin();
        let target = Tracker::new_default();
        set(&target, 5, 5, &source, 105);
        set(&target, 6, 2, &other, 106);
        assert_eq!(
            target.snapshot(),
            snapshot()
                .gap(5)
                .part(1, &source, 105)
                .part(2, &other, 106)
                .part(2, &source, 108)
        );
    }

    #[test]
    fn test_overwrite_with_untracked_leaves_gap() {
        let source = Tracker::origin();
        let target = Tracker::new_default();
        set(&target, 0, 6, &source, 100);
        target.set_source(2, 2, None, 0).unwrap();
        assert_eq!(
            target.snapshot(),
            snapshot().part(2, &source, 100).gap(2).part(2, &source, 104)
        );
        assert!(target.point(2).is_none());
    }

    #[test]
    fn test_overwrite_multiple_parts() {
        let source = Tracker::origin();
        let other = Tracker::origin();
        let target = Tracker::new_default();
        set(&target, 0, 3, &source, 10);
        set(&target, 4, 2, &other, 20);
        set(&target, 7, 4, &source, 40);
        set(&target, 1, 8, &source, 100);
        assert_eq!(
            target.snapshot(),
            snapshot().part(1, &source, 10).part(8, &source, 100).part(2, &source, 42)
        );
    }

    #[test]
    fn test_transitive_source_is_resolved() {
        let source = Tracker::origin();
        let other = Tracker::origin();
        let middleman = Tracker::new_default();
        set(&middleman, 0, 5, &source, 100);
        set(&middleman, 5, 4, &other, 200);

        let target = Tracker::new_default();
        set(&target, 0, 7, &middleman, 1);
        assert_eq!(target.snapshot(), snapshot().part(4, &source, 101).part(3, &other, 200));
    }

    #[test]
    fn test_transitive_unknown_end_becomes_gap() {
        let source = Tracker::origin();
        let middleman = Tracker::new_default();
        set(&middleman, 0, 3, &source, 100);

        let target = Tracker::new_default();
        set(&target, 1, 5, &middleman, 0);
        assert_eq!(target.snapshot(), snapshot().gap(1).part(3, &source, 100));
    }

    #[test]
    fn test_later_change_to_middleman_does_not_leak() {
        let source = Tracker::origin();
        let other = Tracker::origin();
        let middleman = Tracker::new_default();
        set(&middleman, 0, 4, &source, 0);

        let target = Tracker::new_default();
        set(&target, 0, 4, &middleman, 0);
        set(&middleman, 0, 4, &other, 50);

        assert_eq!(target.snapshot(), snapshot().part(4, &source, 0));
    }

    #[test]
    fn test_self_copy_backwards() {
        let source = Tracker::origin();
        let target = Tracker::new_default();
        set(&target, 0, 2, &source, 10);
        set(&target, 2, 2, &source, 20);
        // copy [1, 4) to [0, 3)
        let same = target.clone();
        set(&target, 0, 3, &same, 1);
        assert_eq!(
            target.snapshot(),
            snapshot().part(1, &source, 11).part(2, &source, 20).part(1, &source, 21)
        );
    }

    #[test]
    fn test_self_copy_forwards() {
        let source = Tracker::origin();
        let target = Tracker::new_default();
        set(&target, 0, 3, &source, 10);
        // copy [0, 3) to [1, 4)
        let same = target.clone();
        set(&target, 1, 3, &same, 0);
        assert_eq!(target.snapshot(), snapshot().part(1, &source, 10).part(3, &source, 10));
    }

    #[test]
    fn test_zero_length_is_noop() {
        let source = Tracker::origin();
        let target = Tracker::new_default();
        set(&target, 3, 0, &source, 7);
        assert_eq!(target.part_count(), 0);
    }

    #[test]
    fn test_immutable_roles_reject_set_source() {
        let source = Tracker::origin();
        for tracker in [Tracker::origin(), Tracker::fixed(b"abc".to_vec()), Tracker::tag("t")] {
            let result = tracker.set_source(0, 1, Some(&source), 0);
            assert!(matches!(result, Err(TrackerError::Immutable { .. })));
        }
    }

    #[test]
    fn test_append_only_for_origin_and_sink() {
        let origin = Tracker::origin();
        origin.append(b"abc").unwrap();
        origin.append(b"de").unwrap();
        assert_eq!(origin.len(), 5);
        assert_eq!(origin.content(), b"abcde".to_vec());

        let sink = Tracker::sink();
        sink.append(b"x").unwrap();
        assert_eq!(sink.len(), 1);

        let result = Tracker::new_default().append(b"x");
        assert!(matches!(result, Err(TrackerError::NotAppendable { .. })));
    }

    #[test]
    fn test_twins_are_linked_both_ways() {
        let (origin, sink) = Tracker::twins("socket 127.0.0.1:80");
        assert!(Arc::ptr_eq(&origin.twin().unwrap(), &sink));
        assert!(Arc::ptr_eq(&sink.twin().unwrap(), &origin));
        assert_eq!(origin.role(), TrackerRole::Origin);
        assert_eq!(sink.role(), TrackerRole::Sink);
        assert_eq!(origin.descriptor().as_deref(), Some("socket 127.0.0.1:80 (in)"));
    }

    #[test]
    fn test_init_twin_refuses_relinking() {
        let a = Tracker::origin();
        let b = Tracker::sink();
        let c = Tracker::sink();
        Tracker::init_twin(&a, &b).unwrap();
        assert_eq!(Tracker::init_twin(&a, &c).unwrap_err(), TrackerError::TwinAlreadySet(a.id()));
        assert!(c.twin().is_none());
        assert_eq!(Tracker::init_twin(&c, &c).unwrap_err(), TrackerError::SelfTwin);
    }
}
