//! One-shot cancellation tokens.
//!
//! A [`CancelToken`] owns an arbitrary cleanup closure until disposed.
//! Disposal takes the closure out of the shared slot atomically, so a
//! second disposal observes "already taken" and does nothing. Dropping
//! a token without disposing it never runs the cleanup.
//!
//! Tokens are cheap to clone; clones share the same slot, so any one
//! of them can dispose and the rest become no-ops. The engine relies on
//! this to let a queue-held timer token and a user-held token forward
//! to the same cancellation.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

type Cleanup = Box<dyn FnOnce() + Send>;

/// A one-shot, idempotent cancellation handle.
///
/// # Example
///
/// ```
/// use dispatchq::CancelToken;
///
/// let token = CancelToken::new(|| println!("cancelled"));
/// token.dispose(); // runs the cleanup
/// token.dispose(); // no-op
/// ```
#[derive(Clone)]
pub struct CancelToken {
    slot: Arc<Mutex<Option<Cleanup>>>,
}

impl CancelToken {
    /// Creates a token that runs `cleanup` on first disposal.
    #[must_use]
    pub fn new(cleanup: impl FnOnce() + Send + 'static) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(Box::new(cleanup)))),
        }
    }

    /// Creates an already-spent token whose disposal does nothing.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Runs the cleanup if this token (or a clone) has not been
    /// disposed yet. Safe to call any number of times, at any stage of
    /// the underlying work's life cycle.
    pub fn dispose(&self) {
        // Take the closure under the lock, run it outside: the cleanup
        // may itself take scheduling locks.
        let cleanup = self.slot.lock().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }

    /// Returns true if the cleanup has already been taken.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
