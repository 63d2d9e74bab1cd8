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

//! Call records
//!
//! An [`Invocation`] carries provenance across a call whose argument and return
//! types cannot carry it themselves. The caller creates it, fills argument slots,
//! and marks it as calling; the callee claims it on entry if the signature matches,
//! reads argument points from it and sets the return point before returning.

use crate::context::Context;
use crate::error::{TrackerError, TrackerResult};
use crate::point::TrackerPoint;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// Number of argument slots in a call record
pub const MAX_ARG_SLOTS: usize = 6;

#[derive(Debug, Default)]
struct Slots {
    args: [Option<TrackerPoint>; MAX_ARG_SLOTS],
    return_point: Option<TrackerPoint>,
}

#[derive(Debug)]
pub struct Invocation {
    signature: String,
    slots: Mutex<Slots>,
}

impl Invocation {
    /// Signature string used to match a caller's record with the callee: `"name descriptor"`
    pub fn signature(name: &str, descriptor: &str) -> String {
        format!("{name} {descriptor}")
    }

    pub fn create(signature: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { signature: signature.into(), slots: Mutex::new(Slots::default()) })
    }

    pub fn signature_str(&self) -> &str {
        &self.signature
    }

    pub fn set_arg(&self, slot: usize, point: Option<TrackerPoint>) -> TrackerResult<()> {
        let mut slots = self.slots.lock();
        let target = slots
            .args
            .get_mut(slot)
            .ok_or(TrackerError::ArgSlotOutOfRange { slot, maximum: MAX_ARG_SLOTS })?;
        *target = point;
        Ok(())
    }

    pub fn arg_point(&self, slot: usize) -> Option<TrackerPoint> {
        self.slots.lock().args.get(slot).cloned().flatten()
    }

    /// Hands this record to the next method that starts on this thread
    pub fn calling(self: &Arc<Self>) {
        trace!(signature = %self.signature, "calling");
        Context::with(|context| context.set_pending_invocation(Some(self.clone())));
    }

    /// Claims the record the caller handed over, if it was made for `signature`.
    /// A record for another signature is discarded.
    pub fn start(signature: &str) -> Option<Arc<Self>> {
        Context::with(|context| {
            let pending = context.take_pending_invocation()?;
            if !context.is_active() || pending.signature != signature {
                return None;
            }
            Some(pending)
        })
        .flatten()
    }

    pub fn returning(&self, point: Option<TrackerPoint>) {
        self.slots.lock().return_point = point;
    }

    pub fn return_point(&self) -> Option<TrackerPoint> {
        self.slots.lock().return_point.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;
    use crate::tracker::Tracker;

    #[test]
    fn test_callee_claims_matching_record() {
        let origin = Tracker::origin();
        let point = TrackerPoint::new(origin.clone(), 3, 1);

        let invocation = Invocation::create(Invocation::signature("write", "(B)V"));
        invocation.set_arg(0, Some(point.clone())).unwrap();
        invocation.calling();

        let claimed = Invocation::start("write (B)V").unwrap();
        assert!(Arc::ptr_eq(&claimed, &invocation));
        assert_eq!(claimed.arg_point(0), Some(point));
        assert_eq!(claimed.arg_point(1), None);

        // claimed only once
        assert!(Invocation::start("write (B)V").is_none());
    }

    #[test]
    fn test_signature_mismatch_discards_record() {
        let invocation = Invocation::create("read ()C");
        invocation.calling();
        assert!(Invocation::start("read ()B").is_none());
        assert!(Invocation::start("read ()C").is_none());
    }

    #[test]
    fn test_return_point_travels_back() {
        let origin = Tracker::origin();
        let invocation = Invocation::create("read ()C");
        invocation.calling();
        let callee = Invocation::start("read ()C").unwrap();
        callee.returning(Some(TrackerPoint::new(origin.clone(), 7, 1)));
        assert_eq!(invocation.return_point(), Some(TrackerPoint::new(origin, 7, 1)));
    }

    #[test]
    fn test_arg_slots_are_bounded() {
        let invocation = Invocation::create("f ()V");
        let result = invocation.set_arg(MAX_ARG_SLOTS, None);
        assert_eq!(result, Err(TrackerError::ArgSlotOutOfRange { slot: MAX_ARG_SLOTS, maximum: MAX_ARG_SLOTS }));
    }

    #[test]
    fn test_no_start_while_suspended() {
        let invocation = Invocation::create("read ()C");
        invocation.calling();
        let _guard = context::suspend();
        assert!(Invocation::start("read ()C").is_none());
    }
}
