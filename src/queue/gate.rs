//! Rendezvous gate between a synchronous caller and an active drain.
//!
//! When `submit_sync` finds a drain scheduled or running, it appends a
//! gate work item and parks. The handshake:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │   Caller thread                Drain worker                 │
//! │     │                             │                         │
//! │     │── enqueue gate ──►          │ (holds execution lock)  │
//! │     │                             │── reaches gate          │
//! │     │◄── ready ───────────────────│                         │
//! │     │ run work                    │ parked on done          │
//! │     │── done ────────────────────►│                         │
//! │     │ return                      │ continue drain          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! While the drain is parked inside the gate it still holds the
//! execution lock, so the caller's work cannot overlap any other item
//! of the queue. If the gate item is discarded without running (the
//! queue was disposed while the caller was parked), dropping the drain
//! half aborts the gate and the caller wakes to a `Disposed` error
//! instead of parking forever.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A one-shot set/wait latch.
struct Latch {
    flag: Mutex<bool>,
    signal: Condvar,
}

impl Latch {
    fn new() -> Self {
        Self {
            flag: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    fn set(&self) {
        *self.flag.lock() = true;
        self.signal.notify_all();
    }

    fn wait(&self) {
        let mut flag = self.flag.lock();
        while !*flag {
            self.signal.wait(&mut flag);
        }
    }
}

/// Shared state of one rendezvous.
pub(crate) struct SyncGate {
    ready: Latch,
    done: Latch,
    aborted: AtomicBool,
}

impl SyncGate {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            ready: Latch::new(),
            done: Latch::new(),
            aborted: AtomicBool::new(false),
        })
    }

    /// Caller side: park until the drain reaches the gate or discards it.
    pub(crate) fn wait_ready(&self) {
        self.ready.wait();
    }

    /// Caller side: true if the gate was discarded instead of reached.
    pub(crate) fn was_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Caller side: release the parked drain. Must be signaled on every
    /// exit path, including unwinding.
    pub(crate) fn signal_done(&self) {
        self.done.set();
    }
}

/// The drain-side half of a gate, embedded in the gate work item.
///
/// Running it performs the handshake. Dropping it un-run (the pending
/// list was cleared by `dispose`) aborts the gate so the caller wakes.
pub(crate) struct DrainGate {
    gate: Option<Arc<SyncGate>>,
}

impl DrainGate {
    pub(crate) fn new(gate: Arc<SyncGate>) -> Self {
        Self { gate: Some(gate) }
    }

    /// Signals the caller and parks until it finishes. The execution
    /// lock is held by the caller of this function for the whole park.
    pub(crate) fn run(mut self) {
        let Some(gate) = self.gate.take() else { return };
        gate.ready.set();
        gate.done.wait();
    }
}

impl Drop for DrainGate {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.aborted.store(true, Ordering::Release);
            gate.ready.set();
        }
    }
}
