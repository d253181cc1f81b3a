//! The dispatch engine: scheduling state, submission paths, and drain.
//!
//! Two locks with a strict discipline:
//!
//! - The **scheduler lock** guards the pending list, timer set, drain
//!   state, and disposal flag. No user code ever runs under it.
//! - The **execution lock** is held while a work item runs, serializing
//!   drain items with synchronous callers.
//!
//! The same thread never holds both: every path releases the scheduler
//! lock before taking the execution lock. Holding the scheduler lock
//! across user code would deadlock a reentrant `submit_sync`; holding
//! the execution lock while mutating schedule state would serialize
//! cancellations behind long-running items.

use crate::cancel::CancelToken;
use crate::error::{Error, PanicPayload};
use crate::features::QueueFeatures;
use crate::pool::{Work, WorkerPool};
use crate::queue::gate::{DrainGate, SyncGate};
use crate::queue::{QueueId, SerialQueue};
use crate::stack;
use crate::tracing_compat::{debug, error, trace};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Sink receiving panics that escape asynchronous work items.
pub(crate) type ErrorSink = Arc<dyn Fn(PanicPayload) + Send + Sync>;

/// Drain ownership state, driven under the scheduler lock.
///
/// `Scheduled` and `Processing` both mean a drain is owed to the pool;
/// they are kept distinct so tracing output can tell "queued at the
/// pool" from "actively dequeuing".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DrainState {
    /// No drain pending or active; the pending list is empty.
    Idle,
    /// A drain has been handed to the pool but has not started.
    Scheduled,
    /// A drain is actively popping items.
    Processing,
}

/// A queued work item with its identity for cancellation.
struct PendingWork {
    seq: u64,
    work: Work,
}

/// Everything guarded by the scheduler lock.
struct SchedState {
    pending: VecDeque<PendingWork>,
    timers: HashMap<u64, CancelToken>,
    state: DrainState,
    disposed: bool,
    next_seq: u64,
}

/// A delayed submission's current stage. The outer cancel token
/// forwards to whichever inner token is current.
enum DelayedStage {
    /// Timer has not fired; holds the pool's timer token.
    TimerPending { timer: CancelToken },
    /// Timer fired and the work was enqueued; holds the async-queue
    /// removal token.
    Enqueued { inner: CancelToken },
    /// The outer token was disposed.
    Cancelled,
}

/// Shared state of one serial queue.
pub(crate) struct QueueCore {
    id: QueueId,
    pool: Arc<dyn WorkerPool>,
    features: QueueFeatures,
    sched: Mutex<SchedState>,
    exec: Mutex<()>,
    error_sink: Mutex<Option<ErrorSink>>,
}

impl QueueCore {
    pub(crate) fn new(pool: Arc<dyn WorkerPool>, features: QueueFeatures) -> Self {
        Self {
            id: QueueId::next(),
            pool,
            features,
            sched: Mutex::new(SchedState {
                pending: VecDeque::new(),
                timers: HashMap::new(),
                state: DrainState::Idle,
                disposed: false,
                next_seq: 0,
            }),
            exec: Mutex::new(()),
            error_sink: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> QueueId {
        self.id
    }

    pub(crate) fn features(&self) -> QueueFeatures {
        self.features
    }

    pub(crate) fn pool(&self) -> Arc<dyn WorkerPool> {
        Arc::clone(&self.pool)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.sched.lock().disposed
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.sched.lock().pending.len()
    }

    pub(crate) fn timer_len(&self) -> usize {
        self.sched.lock().timers.len()
    }

    #[cfg(test)]
    pub(crate) fn drain_state(&self) -> DrainState {
        self.sched.lock().state
    }

    pub(crate) fn set_error_sink(&self, sink: ErrorSink) {
        *self.error_sink.lock() = Some(sink);
    }

    /// Appends `work` to the pending list; if the queue was idle,
    /// transitions to `Scheduled` and hands a drain to the pool.
    /// Returns a token that removes the item by identity.
    ///
    /// Caller holds the scheduler lock.
    fn submit_async_locked(self: &Arc<Self>, sched: &mut SchedState, work: Work) -> CancelToken {
        let seq = sched.next_seq;
        sched.next_seq += 1;
        sched.pending.push_back(PendingWork { seq, work });

        if sched.state == DrainState::Idle {
            sched.state = DrainState::Scheduled;
            trace!(queue = ?self.id, "drain scheduled");
            let core = Arc::clone(self);
            self.pool.submit(Box::new(move || core.drain()));
        }

        let weak = Arc::downgrade(self);
        CancelToken::new(move || {
            remove_pending(&weak, seq);
        })
    }

    /// See [`SerialQueue::submit_async`](crate::SerialQueue::submit_async).
    pub(crate) fn submit_async(self: &Arc<Self>, work: Work) -> Result<CancelToken, Error> {
        let mut sched = self.sched.lock();
        if sched.disposed {
            return Err(Error::disposed("submit_async"));
        }
        Ok(self.submit_async_locked(&mut sched, work))
    }

    /// See [`SerialQueue::submit_sync`](crate::SerialQueue::submit_sync).
    pub(crate) fn submit_sync<R>(self: &Arc<Self>, work: impl FnOnce() -> R) -> Result<R, Error> {
        // Snapshot nesting before pushing ourselves: the check must see
        // only outer frames.
        let nested = stack::contains(self.id);
        let _stack = stack::push(SerialQueue::from_core(Arc::clone(self)));

        let mut sched = self.sched.lock();
        if sched.disposed {
            return Err(Error::disposed("submit_sync"));
        }

        if nested {
            // The outer frame is this queue's drain or a synchronous
            // caller rendezvoused with it; either way that frame owns
            // the execution right. Taking the execution lock here
            // would deadlock against it.
            drop(sched);
            trace!(queue = ?self.id, "submit_sync nested fast path");
            return Ok(work());
        }

        if sched.state == DrainState::Idle {
            // No drain is owed. The Idle observation and any competing
            // submit_async both happen under the scheduler lock, so
            // releasing it before taking the execution lock cannot
            // lose a drain; at worst a just-scheduled drain contends
            // on the execution lock like any other item.
            drop(sched);
            trace!(queue = ?self.id, "submit_sync idle fast path");
            let _exec = self.exec.lock();
            return Ok(work());
        }

        // A drain is scheduled or running and we are not inside it:
        // park a gate at the tail and rendezvous. The gate keeps the
        // drain inside the execution lock while our work runs on this
        // thread.
        trace!(queue = ?self.id, "submit_sync rendezvous");
        let gate = SyncGate::new();
        let drain_half = DrainGate::new(Arc::clone(&gate));
        let _gate_token = self.submit_async_locked(&mut sched, Box::new(move || drain_half.run()));
        drop(sched);

        gate.wait_ready();
        if gate.was_aborted() {
            // The queue was disposed while we were parked and the gate
            // was discarded un-run.
            return Err(Error::disposed("submit_sync"));
        }

        let result = catch_unwind(AssertUnwindSafe(work));
        // The drain stays parked until this signal; it must see it on
        // every exit path, panic included.
        gate.signal_done();
        match result {
            Ok(value) => Ok(value),
            Err(payload) => resume_unwind(payload),
        }
    }

    /// See [`SerialQueue::submit_after`](crate::SerialQueue::submit_after).
    pub(crate) fn submit_after(
        self: &Arc<Self>,
        delay: Duration,
        work: Work,
    ) -> Result<CancelToken, Error> {
        let mut sched = self.sched.lock();
        if sched.disposed {
            return Err(Error::disposed("submit_after"));
        }
        let seq = sched.next_seq;
        sched.next_seq += 1;

        let stage = Arc::new(Mutex::new(DelayedStage::TimerPending {
            timer: CancelToken::noop(),
        }));

        let fire: Work = {
            let weak = Arc::downgrade(self);
            let stage = Arc::clone(&stage);
            Box::new(move || {
                let Some(core) = weak.upgrade() else { return };
                let mut sched = core.sched.lock();
                sched.timers.remove(&seq);
                if sched.disposed {
                    return;
                }
                let mut stage = stage.lock();
                if matches!(*stage, DelayedStage::Cancelled) {
                    return;
                }
                // Enqueue while still holding the scheduler lock so
                // the stage flips atomically with the submission.
                let inner = core.submit_async_locked(&mut sched, work);
                *stage = DelayedStage::Enqueued { inner };
            })
        };

        let timer = self.pool.schedule_after(delay, fire);
        // The fire handler blocks on the scheduler lock we still hold,
        // so it cannot observe the placeholder stage.
        *stage.lock() = DelayedStage::TimerPending {
            timer: timer.clone(),
        };
        sched.timers.insert(seq, timer);
        trace!(queue = ?self.id, delay_us = delay.as_micros() as u64, "delayed work scheduled");
        drop(sched);

        let weak = Arc::downgrade(self);
        Ok(CancelToken::new(move || {
            let current = std::mem::replace(&mut *stage.lock(), DelayedStage::Cancelled);
            match current {
                DelayedStage::TimerPending { timer } => {
                    timer.dispose();
                    if let Some(core) = weak.upgrade() {
                        core.sched.lock().timers.remove(&seq);
                    }
                }
                DelayedStage::Enqueued { inner } => inner.dispose(),
                DelayedStage::Cancelled => {}
            }
        }))
    }

    /// The drain loop, invoked on a pool worker.
    pub(crate) fn drain(self: Arc<Self>) {
        let queue = SerialQueue::from_core(Arc::clone(&self));
        let _stack = stack::push(queue.clone());
        let _adapter = if self
            .features
            .contains(QueueFeatures::COOPERATIVE_CONTINUATIONS)
        {
            Some(crate::bridge::install(queue))
        } else {
            None
        };

        let mut sched = self.sched.lock();
        if sched.disposed {
            sched.state = DrainState::Idle;
            debug!(queue = ?self.id, "drain bailed: queue disposed");
            return;
        }
        sched.state = DrainState::Processing;
        trace!(queue = ?self.id, "drain processing");

        loop {
            let Some(item) = sched.pending.pop_front() else { break };
            drop(sched);

            let panic = {
                let _exec = self.exec.lock();
                catch_unwind(AssertUnwindSafe(item.work)).err()
            };
            // The sink runs outside both locks: it is user code.
            if let Some(payload) = panic {
                self.forward_unhandled(PanicPayload::new(payload));
            }

            sched = self.sched.lock();
        }

        sched.state = DrainState::Idle;
        trace!(queue = ?self.id, "drain idle");
    }

    /// See [`SerialQueue::dispose`](crate::SerialQueue::dispose).
    pub(crate) fn dispose(&self) {
        let timers = {
            let mut sched = self.sched.lock();
            if sched.disposed {
                return;
            }
            sched.disposed = true;
            // Dropping pending items aborts any parked sync gates.
            sched.pending.clear();
            std::mem::take(&mut sched.timers)
        };
        debug!(queue = ?self.id, timers = timers.len(), "queue disposed");
        for (_, token) in timers {
            token.dispose();
        }
    }

    fn forward_unhandled(&self, payload: PanicPayload) {
        let sink = self.error_sink.lock().clone();
        match sink {
            Some(sink) => sink(payload),
            None => {
                error!(queue = ?self.id, %payload, "unhandled panic in async work item");
            }
        }
    }
}

/// Removes a pending item by identity; no effect if already dequeued.
fn remove_pending(core: &Weak<QueueCore>, seq: u64) {
    let Some(core) = core.upgrade() else { return };
    let mut sched = core.sched.lock();
    if let Some(position) = sched.pending.iter().position(|item| item.seq == seq) {
        sched.pending.remove(position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::LabPool;
    use crate::test_utils::begin;

    fn lab_core(pool: &LabPool) -> Arc<QueueCore> {
        Arc::new(QueueCore::new(Arc::new(pool.clone()), QueueFeatures::NONE))
    }

    #[test]
    fn state_walks_idle_scheduled_processing_idle() {
        begin("state_walks_idle_scheduled_processing_idle");
        let pool = LabPool::new();
        let core = lab_core(&pool);

        crate::check_eq!(core.drain_state(), DrainState::Idle, "initial state is idle");

        let observed = Arc::new(Mutex::new(None));
        {
            let core2 = Arc::clone(&core);
            let observed = Arc::clone(&observed);
            core.submit_async(Box::new(move || {
                *observed.lock() = Some(core2.drain_state());
            }))
            .expect("queue is live");
        }
        crate::check_eq!(
            core.drain_state(),
            DrainState::Scheduled,
            "submission on idle queue schedules a drain"
        );

        pool.run_until_idle();
        let during = observed.lock().take();
        crate::check_eq!(
            during,
            Some(DrainState::Processing),
            "work observes the processing state"
        );
        crate::check_eq!(
            core.drain_state(),
            DrainState::Idle,
            "exhausted drain returns to idle"
        );
    }

    #[test]
    fn cancel_removes_exactly_the_cancelled_item() {
        begin("cancel_removes_exactly_the_cancelled_item");
        let pool = LabPool::new();
        let core = lab_core(&pool);
        let log = Arc::new(Mutex::new(Vec::new()));

        let push = |tag: &'static str| {
            let log = Arc::clone(&log);
            Box::new(move || log.lock().push(tag)) as Work
        };
        let _a = core.submit_async(push("a")).expect("live");
        let b = core.submit_async(push("b")).expect("live");
        let _c = core.submit_async(push("c")).expect("live");

        b.dispose();
        pool.run_until_idle();

        let order = log.lock().clone();
        crate::check_eq!(order, vec!["a", "c"], "cancelled item skipped, order kept");
    }

    #[test]
    fn panic_in_async_work_reaches_sink_and_drain_continues() {
        begin("panic_in_async_work_reaches_sink_and_drain_continues");
        let pool = LabPool::new();
        let core = lab_core(&pool);
        let log = Arc::new(Mutex::new(Vec::new()));

        {
            let log = Arc::clone(&log);
            core.set_error_sink(Arc::new(move |payload: PanicPayload| {
                log.lock()
                    .push(format!("sink: {}", payload.message().unwrap_or("?")));
            }));
        }
        core.submit_async(Box::new(|| panic!("kaboom"))).expect("live");
        {
            let log = Arc::clone(&log);
            core.submit_async(Box::new(move || log.lock().push("survivor".to_string())))
                .expect("live");
        }
        pool.run_until_idle();

        let order = log.lock().clone();
        crate::check_eq!(
            order,
            vec!["sink: kaboom".to_string(), "survivor".to_string()],
            "panic delivered to sink, next item still ran"
        );
    }

    #[test]
    fn delayed_work_flows_through_both_stages() {
        begin("delayed_work_flows_through_both_stages");
        let pool = LabPool::new();
        let core = lab_core(&pool);
        let log = Arc::new(Mutex::new(Vec::new()));

        {
            let log = Arc::clone(&log);
            core.submit_after(
                Duration::from_millis(50),
                Box::new(move || log.lock().push("late")),
            )
            .expect("live");
        }
        crate::check_eq!(core.timer_len(), 1, "timer recorded");

        // Advancing stages the fire handler; it runs at the next pump.
        pool.advance(Duration::from_millis(50));
        crate::check_eq!(core.timer_len(), 1, "unpumped fire has not run yet");
        pool.run_until_idle();
        crate::check_eq!(core.timer_len(), 0, "fire removed the timer record");

        let order = log.lock().clone();
        crate::check_eq!(order, vec!["late"], "delayed work ran");
    }

    #[test]
    fn outer_token_cancels_after_fire_before_drain() {
        begin("outer_token_cancels_after_fire_before_drain");
        let pool = LabPool::new();
        let core = lab_core(&pool);
        let log = Arc::new(Mutex::new(Vec::new()));

        let token = {
            let log = Arc::clone(&log);
            core.submit_after(
                Duration::from_millis(10),
                Box::new(move || log.lock().push("never")),
            )
            .expect("live")
        };

        // Step exactly the fire handler; the work is now enqueued but
        // the drain has not run.
        pool.advance(Duration::from_millis(10));
        crate::check!(pool.run_one(), "fire handler stepped");
        crate::check_eq!(core.pending_len(), 1, "fired work is pending");
        token.dispose();
        crate::check_eq!(
            core.pending_len(),
            0,
            "outer token forwarded to the queue token"
        );
        pool.run_until_idle();

        crate::check!(log.lock().is_empty(), "cancelled delayed work never ran");
    }
}
