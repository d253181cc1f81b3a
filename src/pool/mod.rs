//! Worker pools: the execution substrate queues dispatch onto.
//!
//! A queue never owns a thread. It hands drains to a [`WorkerPool`]
//! and trusts the pool to run them on *some* worker, eventually. The
//! pool contract is deliberately thin:
//!
//! - [`submit`](WorkerPool::submit) runs work on some worker with no
//!   ordering guarantee relative to other submissions.
//! - [`schedule_after`](WorkerPool::schedule_after) runs work after at
//!   least the given delay; the returned token cancels a timer that
//!   has not fired yet.
//!
//! Implementations must not hold internal locks while running
//! submitted work or timer callbacks: callbacks re-enter queue
//! scheduling locks.
//!
//! [`ThreadPool`] is the production implementation; [`LabPool`] is a
//! deterministic, manually pumped pool for tests.

pub mod lab;
pub mod thread_pool;
pub(crate) mod timer;

pub use lab::LabPool;
pub use thread_pool::{PoolError, ThreadPool, ThreadPoolConfig};

use crate::cancel::CancelToken;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// A unit of work submitted to a pool.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// The execution substrate consumed by queues.
pub trait WorkerPool: Send + Sync {
    /// Schedules `work` to run on some worker. No ordering or delay
    /// guarantees relative to other submissions.
    fn submit(&self, work: Work);

    /// Schedules `work` to run after at least `delay` has elapsed.
    /// Disposing the returned token prevents the fire if the timer is
    /// still pending; disposal after the fire is a no-op.
    fn schedule_after(&self, delay: Duration, work: Work) -> CancelToken;
}

/// Returns the process-wide default pool, created on first use.
///
/// # Panics
///
/// Panics if the default pool's threads cannot be spawned.
pub fn default_pool() -> Arc<dyn WorkerPool> {
    static DEFAULT: OnceLock<Arc<ThreadPool>> = OnceLock::new();
    let pool = DEFAULT.get_or_init(|| {
        let pool = ThreadPool::new(ThreadPoolConfig::default())
            .expect("default thread pool failed to start");
        Arc::new(pool)
    });
    let pool: Arc<ThreadPool> = Arc::clone(pool);
    pool
}
