//! Deterministic pool for tests.
//!
//! [`LabPool`] never spawns a thread. Submissions accumulate until the
//! test pumps them with [`run_until_idle`](LabPool::run_until_idle),
//! which executes everything on the calling thread in submission
//! order. Delayed work is keyed to a virtual clock that only moves
//! when the test calls [`advance`](LabPool::advance), so timer
//! scenarios are exact: advancing by 99ms of a 100ms delay fires
//! nothing, and one more 2ms step fires it.

use crate::cancel::CancelToken;
use crate::pool::timer::{TimerHeap, TimerSlot};
use crate::pool::{Work, WorkerPool};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

struct LabInner {
    ready: Mutex<VecDeque<Work>>,
    timers: Mutex<TimerHeap<Duration>>,
    now: Mutex<Duration>,
}

/// A single-threaded, manually pumped pool with a virtual clock.
#[derive(Clone)]
pub struct LabPool {
    inner: Arc<LabInner>,
}

impl LabPool {
    /// Creates a pool with the clock at zero and nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LabInner {
                ready: Mutex::new(VecDeque::new()),
                timers: Mutex::new(TimerHeap::new()),
                now: Mutex::new(Duration::ZERO),
            }),
        }
    }

    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> Duration {
        *self.inner.now.lock()
    }

    /// Advances the virtual clock, moving every timer whose deadline
    /// has been reached into the ready queue (in deadline order).
    /// Fired work does not run until the pool is pumped.
    pub fn advance(&self, delta: Duration) {
        let now = {
            let mut now = self.inner.now.lock();
            *now += delta;
            *now
        };
        let expired = self.inner.timers.lock().pop_expired(now);
        for slot in expired {
            if let Some(work) = slot.lock().take() {
                self.inner.ready.lock().push_back(work);
            }
        }
    }

    /// Runs a single queued item on the calling thread. Returns false
    /// if nothing was queued. Useful for stepping through a scenario
    /// one scheduling decision at a time.
    pub fn run_one(&self) -> bool {
        let work = self.inner.ready.lock().pop_front();
        match work {
            Some(work) => {
                work();
                true
            }
            None => false,
        }
    }

    /// Runs queued work on the calling thread until nothing is left,
    /// including work enqueued by the work itself. Returns the number
    /// of items executed.
    pub fn run_until_idle(&self) -> usize {
        let mut executed = 0;
        while self.run_one() {
            executed += 1;
        }
        executed
    }

    /// Returns the number of items waiting to be pumped.
    #[must_use]
    pub fn ready_len(&self) -> usize {
        self.inner.ready.lock().len()
    }

    /// Returns the number of timer entries that have not expired,
    /// including cancelled ones whose deadline has not come up.
    #[must_use]
    pub fn timer_len(&self) -> usize {
        self.inner.timers.lock().len()
    }
}

impl Default for LabPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool for LabPool {
    fn submit(&self, work: Work) {
        self.inner.ready.lock().push_back(work);
    }

    fn schedule_after(&self, delay: Duration, work: Work) -> CancelToken {
        let slot: TimerSlot = Arc::new(Mutex::new(Some(work)));
        let deadline = *self.inner.now.lock() + delay;
        self.inner.timers.lock().insert(deadline, Arc::clone(&slot));

        CancelToken::new(move || {
            slot.lock().take();
        })
    }
}

impl fmt::Debug for LabPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabPool")
            .field("now", &self.now())
            .field("ready", &self.ready_len())
            .field("timers", &self.timer_len())
            .finish()
    }
}
