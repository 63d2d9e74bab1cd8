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

//! Per-thread tracking context
//!
//! Holds the suspend counter that switches tracking off while the store does its own
//! bookkeeping, and the invocation a caller hands over to the method it is calling.

use crate::invocation::Invocation;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::sync::Arc;

thread_local! {
    static CONTEXT: Context = const {
        Context {
            suspended: Cell::new(0),
            pending_invocation: RefCell::new(None),
        }
    };
}

pub struct Context {
    suspended: Cell<u32>,
    pending_invocation: RefCell<Option<Arc<Invocation>>>,
}

impl Context {
    /// Runs `f` with the current thread's context. Returns None while the thread is
    /// being torn down and its context is gone.
    pub fn with<R>(f: impl FnOnce(&Context) -> R) -> Option<R> {
        CONTEXT.try_with(f).ok()
    }

    pub fn is_active(&self) -> bool {
        self.suspended.get() == 0
    }

    pub fn suspended_depth(&self) -> u32 {
        self.suspended.get()
    }

    pub(crate) fn set_pending_invocation(&self, invocation: Option<Arc<Invocation>>) {
        *self.pending_invocation.borrow_mut() = invocation;
    }

    pub(crate) fn take_pending_invocation(&self) -> Option<Arc<Invocation>> {
        self.pending_invocation.borrow_mut().take()
    }
}

/// True when tracking is enabled on this thread
pub fn is_active() -> bool {
    Context::with(Context::is_active).unwrap_or(false)
}

/// Suspends tracking on this thread until the returned guard is dropped.
/// Guards nest; tracking resumes when the outermost one is gone.
pub fn suspend() -> SuspendGuard {
    Context::with(|context| context.suspended.set(context.suspended.get() + 1));
    SuspendGuard { _not_send: PhantomData }
}

#[must_use = "tracking resumes as soon as the guard is dropped"]
pub struct SuspendGuard {
    // the counter is thread-local, so the guard must be dropped on the thread that made it
    _not_send: PhantomData<*const ()>,
}

impl Drop for SuspendGuard {
    fn drop(&mut self) {
        Context::with(|context| context.suspended.set(context.suspended.get().saturating_sub(1)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guards_nest() {
        assert!(is_active());
        {
            let _outer = suspend();
            assert!(!is_active());
            {
                let _inner = suspend();
                assert_eq!(Context::with(Context::suspended_depth), Some(2));
            }
            assert!(!is_active());
        }
        assert!(is_active());
    }

    #[test]
    fn test_guard_released_on_early_return() {
        fn bail() -> Result<(), ()> {
            let _guard = suspend();
            Err(())?;
            Ok(())
        }
        assert!(bail().is_err());
        assert!(is_active());
    }

    #[test]
    fn test_suspension_is_per_thread() {
        let _guard = suspend();
        let other = std::thread::spawn(is_active).join().unwrap();
        assert!(other);
        assert!(!is_active());
    }
}
