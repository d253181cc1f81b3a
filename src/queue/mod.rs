//! Serial queues: the public front door.
//!
//! A [`SerialQueue`] serializes work items on top of a shared
//! [`WorkerPool`]: items run one at a time, in submission order, and
//! never overlap with each other, without dedicating a thread to the
//! queue. Handles are cheap to clone; all clones address the same
//! queue.
//!
//! # Example
//!
//! ```
//! use dispatchq::{QueueFeatures, SerialQueue};
//!
//! let queue = SerialQueue::new(QueueFeatures::default());
//! queue.submit_async(|| println!("runs on a pool worker")).unwrap();
//! let answer = queue.submit_sync(|| 42).unwrap();
//! assert_eq!(answer, 42);
//! ```

mod core;
mod gate;

pub(crate) use self::core::QueueCore;

use crate::cancel::CancelToken;
use crate::error::{Error, PanicPayload};
use crate::features::QueueFeatures;
use crate::pool::{default_pool, WorkerPool};
use crate::stack;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Identity of a queue, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(u64);

impl QueueId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A serial dispatch queue over a shared worker pool.
///
/// # Guarantees
///
/// - Asynchronous submissions drain in FIFO order.
/// - No two work items of the same queue ever run concurrently.
/// - [`submit_sync`](Self::submit_sync) runs on the caller's thread,
///   serialized against the drain, and is safe to call from within a
///   work item of the same queue (it runs inline).
/// - No specific OS thread hosts the queue's work; only mutual
///   exclusion per queue is promised.
#[derive(Clone)]
pub struct SerialQueue {
    core: Arc<QueueCore>,
}

impl SerialQueue {
    /// Creates a queue on the process-wide default pool.
    #[must_use]
    pub fn new(features: QueueFeatures) -> Self {
        Self::with_pool(default_pool(), features)
    }

    /// Creates a queue on the given pool.
    #[must_use]
    pub fn with_pool(pool: Arc<dyn WorkerPool>, features: QueueFeatures) -> Self {
        Self {
            core: Arc::new(QueueCore::new(pool, features)),
        }
    }

    pub(crate) fn from_core(core: Arc<QueueCore>) -> Self {
        Self { core }
    }

    /// Returns this queue's identity.
    #[must_use]
    pub fn id(&self) -> QueueId {
        self.core.id()
    }

    /// Returns the feature flags the queue was created with.
    #[must_use]
    pub fn features(&self) -> QueueFeatures {
        self.core.features()
    }

    pub(crate) fn worker_pool(&self) -> Arc<dyn WorkerPool> {
        self.core.pool()
    }

    /// Appends `work` to the queue and returns without running it.
    ///
    /// If the queue was idle, a drain is handed to the pool. The
    /// returned token removes the item if it has not been dequeued
    /// yet; disposal after that is a no-op.
    ///
    /// If `submit_async(a)` happens before `submit_async(b)` in
    /// program order on any one thread, `a` runs before `b`.
    ///
    /// # Errors
    ///
    /// Fails with a `Disposed` error after [`dispose`](Self::dispose).
    pub fn submit_async(
        &self,
        work: impl FnOnce() + Send + 'static,
    ) -> Result<CancelToken, Error> {
        self.core.submit_async(Box::new(work))
    }

    /// Runs `work` on the calling thread, serialized with the queue,
    /// and returns its value.
    ///
    /// Blocks until every previously submitted item has finished. Safe
    /// to call from inside a work item of this queue: the nested call
    /// runs inline instead of deadlocking. Panics from `work` propagate
    /// verbatim to the caller.
    ///
    /// # Errors
    ///
    /// Fails with a `Disposed` error if the queue is disposed at entry,
    /// or becomes disposed while the caller is waiting its turn.
    pub fn submit_sync<R>(&self, work: impl FnOnce() -> R) -> Result<R, Error> {
        self.core.submit_sync(work)
    }

    /// Schedules `work` to be appended to the queue after `delay`.
    ///
    /// The returned token is two-stage: before the timer fires it
    /// cancels the timer; afterwards it cancels the queued submission.
    /// Disposal is idempotent and safe at any stage.
    ///
    /// # Errors
    ///
    /// Fails with a `Disposed` error after [`dispose`](Self::dispose).
    pub fn submit_after(
        &self,
        delay: Duration,
        work: impl FnOnce() + Send + 'static,
    ) -> Result<CancelToken, Error> {
        self.core.submit_after(delay, Box::new(work))
    }

    /// Drives `future` to completion as a chain of queue work items.
    ///
    /// With [`QueueFeatures::COOPERATIVE_CONTINUATIONS`] set, every
    /// resumption after a suspension point is re-dispatched through
    /// this queue, so [`current`](Self::current) keeps returning this
    /// queue across `await`s. With the feature off, resumptions run
    /// wherever the pool puts them.
    ///
    /// # Errors
    ///
    /// Fails with a `Disposed` error after [`dispose`](Self::dispose).
    pub fn spawn(&self, future: impl Future<Output = ()> + Send + 'static) -> Result<(), Error> {
        crate::bridge::spawn(self, future)
    }

    /// Fails unless the calling thread is currently executing a work
    /// item of this queue.
    ///
    /// # Errors
    ///
    /// Returns a `WrongQueue` error when called from anywhere else.
    pub fn verify_on_queue(&self) -> Result<(), Error> {
        if stack::contains(self.id()) {
            Ok(())
        } else {
            Err(Error::wrong_queue("verify_on_queue"))
        }
    }

    /// Returns the queue whose work item the calling thread is
    /// innermost inside, if any.
    #[must_use]
    pub fn current() -> Option<SerialQueue> {
        stack::innermost()
    }

    /// Registers a callback for panics escaping asynchronous work
    /// items. Replaces any previously registered sink.
    pub fn on_unhandled_error(&self, sink: impl Fn(PanicPayload) + Send + Sync + 'static) {
        self.core.set_error_sink(Arc::new(sink));
    }

    /// Shuts the queue down: pending items and timers are dropped, and
    /// every later submission fails with a `Disposed` error. A drain
    /// that is mid-item finishes that item first. Idempotent.
    pub fn dispose(&self) {
        self.core.dispose();
    }

    /// Returns true once [`dispose`](Self::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }

    /// Returns the number of work items waiting to be drained.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.core.pending_len()
    }

    /// Returns the number of delayed submissions whose timer has not
    /// fired.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.core.timer_len()
    }
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue")
            .field("id", &self.id())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl PartialEq for SerialQueue {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for SerialQueue {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::LabPool;
    use crate::test_utils::begin;

    #[test]
    fn handles_compare_by_queue_identity() {
        begin("handles_compare_by_queue_identity");
        let pool = Arc::new(LabPool::new());
        let queue = SerialQueue::with_pool(pool.clone(), QueueFeatures::default());
        let clone = queue.clone();
        let other = SerialQueue::with_pool(pool, QueueFeatures::default());

        crate::check!(queue == clone, "clone is the same queue");
        crate::check!(queue != other, "fresh queue differs");
    }

    #[test]
    fn current_is_none_off_queue() {
        begin("current_is_none_off_queue");
        crate::check!(
            SerialQueue::current().is_none(),
            "no queue on a plain test thread"
        );
    }

    #[test]
    fn verify_on_queue_inside_and_outside() {
        begin("verify_on_queue_inside_and_outside");
        let pool = LabPool::new();
        let queue = SerialQueue::with_pool(Arc::new(pool.clone()), QueueFeatures::default());

        crate::check!(queue.verify_on_queue().is_err(), "verify fails off-queue");

        let inside = Arc::new(parking_lot::Mutex::new(None));
        {
            let queue2 = queue.clone();
            let inside = Arc::clone(&inside);
            queue
                .submit_async(move || {
                    *inside.lock() = Some(queue2.verify_on_queue().is_ok());
                })
                .expect("live queue");
        }
        pool.run_until_idle();

        let inside = inside.lock().take();
        crate::check_eq!(inside, Some(true), "verify succeeds inside a work item");
    }

    #[test]
    fn current_inside_work_is_this_queue() {
        begin("current_inside_work_is_this_queue");
        let pool = LabPool::new();
        let queue = SerialQueue::with_pool(Arc::new(pool.clone()), QueueFeatures::default());

        let seen = Arc::new(parking_lot::Mutex::new(None));
        {
            let seen = Arc::clone(&seen);
            queue
                .submit_async(move || {
                    *seen.lock() = SerialQueue::current().map(|q| q.id());
                })
                .expect("live queue");
        }
        pool.run_until_idle();

        let seen = seen.lock().take();
        crate::check_eq!(
            seen,
            Some(queue.id()),
            "current resolves to the draining queue"
        );
    }
}
