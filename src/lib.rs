//! Serial dispatch queues over a shared worker pool.
//!
//! A [`SerialQueue`] serializes its submitted work items: they run
//! one at a time, in submission order, and never overlap with each
//! other. Many queues share one small pool of OS threads, so a queue
//! costs two mutexes and a list, not a thread. A resource guarded by a
//! queue is thread-safe without its own locking.
//!
//! # Submission forms
//!
//! - [`submit_async`](SerialQueue::submit_async): append and return; a
//!   [`CancelToken`] removes the item if it has not started.
//! - [`submit_sync`](SerialQueue::submit_sync): run on the calling
//!   thread, serialized with the queue, returning the closure's value.
//!   Reentrant: calling it from inside the queue's own work runs the
//!   closure inline instead of deadlocking.
//! - [`submit_after`](SerialQueue::submit_after): append after a
//!   delay; the token cancels the timer or, after firing, the queued
//!   submission.
//! - [`spawn`](SerialQueue::spawn): drive a future as a chain of work
//!   items; with [`QueueFeatures::COOPERATIVE_CONTINUATIONS`] each
//!   resumption is re-dispatched through the queue.
//!
//! # Example
//!
//! ```
//! use dispatchq::{QueueFeatures, SerialQueue};
//!
//! let queue = SerialQueue::new(QueueFeatures::default());
//! let counter = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
//!
//! for _ in 0..4 {
//!     let counter = counter.clone();
//!     queue
//!         .submit_async(move || {
//!             counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         })
//!         .unwrap();
//! }
//!
//! // submit_sync waits for everything queued before it.
//! let total = queue
//!     .submit_sync(|| counter.load(std::sync::atomic::Ordering::Relaxed))
//!     .unwrap();
//! assert_eq!(total, 4);
//! ```
//!
//! # Errors
//!
//! Submissions on a disposed queue fail with [`ErrorKind::Disposed`];
//! [`verify_on_queue`](SerialQueue::verify_on_queue) fails with
//! [`ErrorKind::WrongQueue`] off-queue. Panics from synchronous work
//! propagate to the caller; panics from asynchronous work go to the
//! sink registered with
//! [`on_unhandled_error`](SerialQueue::on_unhandled_error).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bridge;
pub mod cancel;
pub mod error;
pub mod features;
pub mod pool;
pub mod queue;
pub mod test_utils;
pub mod tracing_compat;

mod stack;

pub use bridge::{yield_now, ContinuationAdapter, YieldNow};
pub use cancel::CancelToken;
pub use error::{Error, ErrorKind, PanicPayload};
pub use features::QueueFeatures;
pub use pool::{default_pool, LabPool, ThreadPool, ThreadPoolConfig, Work, WorkerPool};
pub use queue::{QueueId, SerialQueue};

/// Test assertion that records the failing condition through
/// [`tracing_compat`] before panicking.
///
/// Concurrency tests produce interleaved logs; putting the failure
/// into the same stream as the queue's own trace lines keeps the bad
/// interleaving visible next to the assertion that caught it.
#[macro_export]
macro_rules! check {
    ($cond:expr, $why:expr) => {
        if !$cond {
            $crate::tracing_compat::error!(
                why = $why,
                condition = stringify!($cond),
                "check failed"
            );
            panic!("check failed: {} [{}]", $why, stringify!($cond));
        }
    };
}

/// Equality variant of [`check!`]; logs both sides on failure.
#[macro_export]
macro_rules! check_eq {
    ($actual:expr, $expected:expr, $why:expr) => {{
        let actual = &$actual;
        let expected = &$expected;
        if actual != expected {
            $crate::tracing_compat::error!(
                why = $why,
                expected = ?expected,
                actual = ?actual,
                "check failed"
            );
            panic!(
                "check failed: {} (expected {:?}, got {:?})",
                $why, expected, actual
            );
        }
    }};
}
