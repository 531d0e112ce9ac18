//! Pending faults raised inside native-called host code
//!
//! A host function invoked from native code cannot unwind through the
//! native frames above it. Instead the failure is parked here and the
//! zeroed return value is handed back to native code; the host entry point
//! that started the native call collects the fault once control returns.
//!
//! Only the first fault of a native call is kept. Later ones are logged and
//! dropped.

use crate::error::Error;
use std::cell::RefCell;
use tracing::warn;

thread_local! {
    static PENDING: RefCell<Option<Error>> = const { RefCell::new(None) };
}

/// Record a fault for the current native call
pub(crate) fn raise(err: Error) {
    PENDING.with(|pending| {
        let mut slot = pending.borrow_mut();
        match slot.as_ref() {
            Some(first) => warn!(dropped = %err, pending = %first, "fault already pending"),
            None => *slot = Some(err),
        }
    });
}

/// Take the pending fault, if any
pub fn take() -> Option<Error> {
    PENDING.with(|pending| pending.borrow_mut().take())
}

/// Check whether a fault is waiting to be collected
pub fn is_pending() -> bool {
    PENDING.with(|pending| pending.borrow().is_some())
}

/// Run `f` with a clean fault slot and return whatever it raised
///
/// A fault that was already pending when `f` started belongs to an outer
/// native call; it is restored afterwards.
pub(crate) fn isolate<R>(f: impl FnOnce() -> R) -> (R, Option<Error>) {
    let outer = take();
    let result = f();
    let inner = take();
    if let Some(outer) = outer {
        PENDING.with(|pending| *pending.borrow_mut() = Some(outer));
    }
    (result, inner)
}
