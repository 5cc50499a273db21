#![forbid(unsafe_code)]

//! Thread-local microtask queue for deferred notification delivery.
//!
//! Deferred listeners enqueue their invocation here instead of running inline
//! inside the mutating call. [`flush_deferred`] drains the queue; tasks
//! enqueued while a flush is running are run by that same flush.
//!
//! # Failure Modes
//!
//! - A nested [`flush_deferred`] (called from inside a task) returns `0`
//!   without running anything; the outer flush picks the remaining tasks up.
//! - A panicking task leaves the rest of the queue pending and the queue
//!   usable for the next flush.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

type Task = Box<dyn FnOnce()>;

thread_local! {
    static QUEUE: RefCell<VecDeque<Task>> = RefCell::new(VecDeque::new());
    static FLUSHING: Cell<bool> = const { Cell::new(false) };
}

pub(crate) fn enqueue(task: impl FnOnce() + 'static) {
    QUEUE.with(|queue| queue.borrow_mut().push_back(Box::new(task)));
}

/// Number of tasks waiting for the next flush.
#[must_use]
pub fn pending_deferred() -> usize {
    QUEUE.with(|queue| queue.borrow().len())
}

struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        FLUSHING.with(|flag| flag.set(false));
    }
}

/// Run every queued task, including tasks queued during the flush. Returns
/// the number of tasks run.
pub fn flush_deferred() -> usize {
    if FLUSHING.with(|flag| flag.replace(true)) {
        return 0;
    }
    let _guard = FlushGuard;
    let mut ran = 0;
    loop {
        let Some(task) = QUEUE.with(|queue| queue.borrow_mut().pop_front()) else {
            break;
        };
        task();
        ran += 1;
    }
    if ran > 0 {
        tracing::trace!(tasks = ran, "deferred queue flushed");
    }
    ran
}
