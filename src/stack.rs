//! Thread-local stack of queues executing on the current thread.
//!
//! Every work item runs with its queue pushed onto this stack, whether
//! it arrived via a drain, a synchronous call, or a nested call. The
//! stack is what lets [`submit_sync`] distinguish "this thread is
//! already inside this queue" from "this thread merely happens to be a
//! pool worker", and what backs [`current`] / [`verify_on_queue`].
//!
//! The stack is owned by its thread; no synchronization is involved.
//!
//! [`submit_sync`]: crate::SerialQueue::submit_sync
//! [`current`]: crate::SerialQueue::current
//! [`verify_on_queue`]: crate::SerialQueue::verify_on_queue

use crate::queue::{QueueId, SerialQueue};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::marker::PhantomData;

thread_local! {
    /// Queues whose work item is currently on this thread's call stack,
    /// outermost first. SmallVec<2> covers dispatch nesting without a
    /// heap allocation in the common case.
    static QUEUE_STACK: RefCell<SmallVec<[SerialQueue; 2]>> = RefCell::new(SmallVec::new());
}

/// Pushes `queue` onto the current thread's stack, returning a guard
/// that pops it again on drop (including during unwinding).
#[must_use]
pub(crate) fn push(queue: SerialQueue) -> StackGuard {
    QUEUE_STACK.with(|stack| stack.borrow_mut().push(queue));
    StackGuard {
        _not_send: PhantomData,
    }
}

/// Returns true if `id` is anywhere on the current thread's stack.
pub(crate) fn contains(id: QueueId) -> bool {
    QUEUE_STACK.with(|stack| stack.borrow().iter().any(|queue| queue.id() == id))
}

/// Returns the innermost queue on the current thread's stack.
pub(crate) fn innermost() -> Option<SerialQueue> {
    QUEUE_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Returns the current nesting depth. Used by tests.
#[cfg(test)]
pub(crate) fn depth() -> usize {
    QUEUE_STACK.with(|stack| stack.borrow().len())
}

/// RAII guard popping the innermost stack entry.
///
/// Not `Send`: the pop must happen on the thread that pushed.
pub(crate) struct StackGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        QUEUE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
