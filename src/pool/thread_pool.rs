//! Default worker pool backed by OS threads.
//!
//! A fixed set of worker threads drains a shared injector queue; an
//! additional timer thread drives the [`TimerHeap`](super::timer) for
//! `schedule_after`. Workers park on a condvar when idle and survive
//! panicking work items.

use crate::cancel::CancelToken;
use crate::pool::timer::{TimerHeap, TimerSlot};
use crate::pool::{Work, WorkerPool};
use crate::tracing_compat::{debug, error, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Error constructing a [`ThreadPool`].
#[derive(Debug)]
pub enum PoolError {
    /// `worker_count` was zero.
    ZeroWorkers,
    /// The OS refused to spawn a pool thread.
    Spawn(std::io::Error),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroWorkers => f.write_str("thread pool requires at least one worker"),
            Self::Spawn(err) => write!(f, "failed to spawn pool thread: {err}"),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ZeroWorkers => None,
            Self::Spawn(err) => Some(err),
        }
    }
}

/// Configuration for a [`ThreadPool`].
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Number of worker threads. Defaults to the available parallelism.
    pub worker_count: usize,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl ThreadPoolConfig {
    /// Returns a config with the given worker count and default naming.
    #[must_use]
    pub fn with_workers(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ZeroWorkers`] when `worker_count` is zero.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.worker_count == 0 {
            return Err(PoolError::ZeroWorkers);
        }
        Ok(())
    }
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism().map_or(2, usize::from),
            thread_name_prefix: "dispatchq-worker".to_string(),
        }
    }
}

/// Shared submission queue between submitters and workers.
struct Injector {
    queue: Mutex<VecDeque<Work>>,
    available: Condvar,
    shutdown: AtomicBool,
}

impl Injector {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Enqueues work and wakes one idle worker. Returns false once the
    /// pool has begun shutting down.
    fn push(&self, work: Work) -> bool {
        if self.shutdown.load(Ordering::Acquire) {
            return false;
        }
        self.queue.lock().push_back(work);
        self.available.notify_one();
        true
    }

    /// Blocks until work is available or the pool shuts down.
    fn pop_blocking(&self) -> Option<Work> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(work) = queue.pop_front() {
                return Some(work);
            }
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            self.available.wait(&mut queue);
        }
    }

    fn close(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.available.notify_all();
    }
}

/// Timer thread state.
struct TimerShared {
    heap: Mutex<TimerHeap<Instant>>,
    tick: Condvar,
    shutdown: AtomicBool,
}

impl TimerShared {
    fn new() -> Self {
        Self {
            heap: Mutex::new(TimerHeap::new()),
            tick: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    fn close(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.tick.notify_all();
    }
}

/// A fixed-size worker pool with timer support.
///
/// Dropping the pool stops accepting work, lets in-flight items finish,
/// and joins all threads. Pending timers that have not fired are
/// discarded.
pub struct ThreadPool {
    injector: Arc<Injector>,
    timer: Arc<TimerShared>,
    threads: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Creates a pool from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] when the configuration is invalid or a
    /// thread cannot be spawned.
    pub fn new(config: ThreadPoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let injector = Arc::new(Injector::new());
        let timer = Arc::new(TimerShared::new());
        let mut threads = Vec::with_capacity(config.worker_count + 1);

        for index in 0..config.worker_count {
            let injector = Arc::clone(&injector);
            let handle = std::thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name_prefix))
                .spawn(move || worker_main(&injector))
                .map_err(PoolError::Spawn)?;
            threads.push(handle);
        }

        {
            let timer = Arc::clone(&timer);
            let injector = Arc::clone(&injector);
            let handle = std::thread::Builder::new()
                .name(format!("{}-timer", config.thread_name_prefix))
                .spawn(move || timer_main(&timer, &injector))
                .map_err(PoolError::Spawn)?;
            threads.push(handle);
        }

        debug!(workers = config.worker_count, "thread pool started");
        Ok(Self {
            injector,
            timer,
            threads,
        })
    }
}

impl WorkerPool for ThreadPool {
    fn submit(&self, work: Work) {
        if !self.injector.push(work) {
            warn!("work submitted to a shut down pool was dropped");
        }
    }

    fn schedule_after(&self, delay: Duration, work: Work) -> CancelToken {
        let slot: TimerSlot = Arc::new(Mutex::new(Some(work)));
        let deadline = Instant::now() + delay;
        self.timer.heap.lock().insert(deadline, Arc::clone(&slot));
        self.timer.tick.notify_one();

        CancelToken::new(move || {
            // Emptying the slot prevents the fire; the heap entry is
            // skipped when its deadline comes up.
            slot.lock().take();
        })
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.injector.close();
        self.timer.close();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("pool thread panicked outside a work item");
            }
        }
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.threads.len())
            .finish_non_exhaustive()
    }
}

/// Worker loop: pop, run, repeat. A panicking item must not take the
/// worker down.
fn worker_main(injector: &Injector) {
    while let Some(work) = injector.pop_blocking() {
        if catch_unwind(AssertUnwindSafe(work)).is_err() {
            error!("work item panicked on a pool worker");
        }
    }
}

/// Timer loop: sleep until the earliest deadline, fire expired slots
/// into the injector.
fn timer_main(shared: &TimerShared, injector: &Injector) {
    let mut heap = shared.heap.lock();
    while !shared.shutdown.load(Ordering::Acquire) {
        let expired = heap.pop_expired(Instant::now());
        if !expired.is_empty() {
            MutexGuard::unlocked(&mut heap, || {
                for slot in expired {
                    if let Some(work) = slot.lock().take() {
                        if !injector.push(work) {
                            warn!("timer fired after pool shutdown; work dropped");
                        }
                    }
                }
            });
            continue;
        }

        match heap.peek_deadline() {
            Some(deadline) => {
                let _ = shared.tick.wait_until(&mut heap, deadline);
            }
            None => shared.tick.wait(&mut heap),
        }
    }
}
