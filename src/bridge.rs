//! Cooperative continuation bridge.
//!
//! When a queue drains with
//! [`QueueFeatures::COOPERATIVE_CONTINUATIONS`] set, it installs a
//! [`ContinuationAdapter`] as the thread's ambient continuation hook
//! and restores the previous hook when the drain exits. Futures driven
//! by [`SerialQueue::spawn`] read the hook at each suspension point:
//! the waker they hand out re-dispatches the resumption through the
//! adapter's queue, so `SerialQueue::current()` keeps answering the
//! owning queue across `await`s. Without the feature the hook is
//! absent and resumptions go straight to the worker pool.
//!
//! The adapter exposes the two classic operations:
//!
//! - [`post`](ContinuationAdapter::post): fire-and-forget via
//!   `submit_async`
//! - [`send`](ContinuationAdapter::send): blocking via `submit_sync`

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::pool::{Work, WorkerPool};
use crate::queue::SerialQueue;
use crate::tracing_compat::{debug, trace};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

thread_local! {
    /// The ambient continuation hook of the current thread, present
    /// only while a continuation-enabled drain is running.
    static CURRENT_ADAPTER: RefCell<Option<ContinuationAdapter>> = RefCell::new(None);
}

/// Routes continuations back to the queue that installed it.
#[derive(Clone)]
pub struct ContinuationAdapter {
    queue: SerialQueue,
}

impl ContinuationAdapter {
    fn new(queue: SerialQueue) -> Self {
        Self { queue }
    }

    /// The queue this adapter dispatches to.
    #[must_use]
    pub fn queue(&self) -> &SerialQueue {
        &self.queue
    }

    /// Dispatches `work` asynchronously onto the owning queue.
    ///
    /// # Errors
    ///
    /// Fails with a `Disposed` error if the queue has been disposed.
    pub fn post(&self, work: impl FnOnce() + Send + 'static) -> Result<CancelToken, Error> {
        self.queue.submit_async(work)
    }

    /// Runs `work` synchronously on the owning queue, blocking the
    /// calling thread until it completes.
    ///
    /// # Errors
    ///
    /// Fails with a `Disposed` error if the queue has been disposed.
    pub fn send<R>(&self, work: impl FnOnce() -> R) -> Result<R, Error> {
        self.queue.submit_sync(work)
    }
}

/// Returns the calling thread's ambient continuation hook, if any.
#[must_use]
pub fn current() -> Option<ContinuationAdapter> {
    CURRENT_ADAPTER.with(|adapter| adapter.borrow().clone())
}

/// Installs `queue` as the thread's hook, returning a guard that
/// restores the previous hook on drop.
#[must_use]
pub(crate) fn install(queue: SerialQueue) -> AdapterGuard {
    let previous = CURRENT_ADAPTER.with(|adapter| {
        adapter
            .borrow_mut()
            .replace(ContinuationAdapter::new(queue))
    });
    AdapterGuard {
        previous,
        _not_send: PhantomData,
    }
}

/// RAII guard restoring the previously installed hook.
pub(crate) struct AdapterGuard {
    previous: Option<ContinuationAdapter>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for AdapterGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_ADAPTER.with(|adapter| *adapter.borrow_mut() = previous);
    }
}

/// A future being driven as a chain of queue work items.
struct TaskState {
    future: Mutex<Option<Pin<Box<dyn Future<Output = ()> + Send>>>>,
    /// True while a poll step is enqueued but has not started; wakes
    /// arriving in that window are deduplicated.
    scheduled: AtomicBool,
    /// Fallback route when no hook is installed at the suspension
    /// point.
    pool: Arc<dyn WorkerPool>,
}

/// See [`SerialQueue::spawn`](crate::SerialQueue::spawn).
pub(crate) fn spawn(
    queue: &SerialQueue,
    future: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Error> {
    let task = Arc::new(TaskState {
        future: Mutex::new(Some(Box::pin(future))),
        scheduled: AtomicBool::new(true),
        pool: queue.worker_pool(),
    });
    let step = Arc::clone(&task);
    queue.submit_async(move || poll_task(&step))?;
    Ok(())
}

/// Runs one poll step. The waker handed to the future captures the
/// ambient hook as it stands right now, which is what makes
/// resumptions follow the queue: during a continuation-enabled drain
/// the hook is this queue's adapter.
fn poll_task(task: &Arc<TaskState>) {
    // Clear before polling so a wake fired mid-poll schedules the next
    // step instead of getting lost.
    task.scheduled.store(false, Ordering::Release);

    let route = current();
    let waker = Waker::from(Arc::new(StepWaker {
        task: Arc::clone(task),
        route,
    }));
    let mut cx = Context::from_waker(&waker);

    let mut slot = task.future.lock();
    let Some(future) = slot.as_mut() else { return };
    match future.as_mut().poll(&mut cx) {
        Poll::Ready(()) => {
            *slot = None;
            trace!("spawned task completed");
        }
        Poll::Pending => {}
    }
}

/// Waker for one suspension point of a spawned task.
struct StepWaker {
    task: Arc<TaskState>,
    route: Option<ContinuationAdapter>,
}

impl StepWaker {
    fn schedule(&self) {
        if self.task.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let task = Arc::clone(&self.task);
        let step: Work = Box::new(move || poll_task(&task));
        match &self.route {
            Some(adapter) => {
                if adapter.post(step).is_err() {
                    debug!("continuation dropped: queue disposed");
                }
            }
            None => self.task.pool.submit(step),
        }
    }
}

impl Wake for StepWaker {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

/// Where a [`yield_now`] suspension currently stands.
enum YieldState {
    /// The suspension point has not been reached; the next poll parks.
    Armed,
    /// The resumption has been requested from the ambient routing; the
    /// next poll completes.
    Resuming,
}

/// A single deliberate suspension point.
///
/// The first poll requests its own resumption and parks. Whichever
/// routing is ambient at that moment decides where the task continues:
/// under a continuation-enabled drain the request goes back through
/// the owning queue, otherwise straight to the pool.
pub struct YieldNow {
    state: YieldState,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.state {
            YieldState::Armed => {
                self.state = YieldState::Resuming;
                // Request the resumption before parking; the waker
                // carries the routing captured at this suspension
                // point.
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            YieldState::Resuming => Poll::Ready(()),
        }
    }
}

/// Suspends the current task once, re-entering through the ambient
/// continuation routing.
#[must_use]
pub fn yield_now() -> YieldNow {
    YieldNow {
        state: YieldState::Armed,
    }
}
