//! Error types and error handling strategy for dispatchq.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Submission errors are surfaced synchronously to the submitter
//! - Panics escaping synchronous work propagate verbatim to the caller
//! - Panics escaping asynchronous work are captured as [`PanicPayload`]
//!   and delivered to the queue's unhandled-error sink; pool workers
//!   must not die
//!
//! # Error Categories
//!
//! - **Disposed**: submission attempted on a queue after [`dispose`]
//! - **WrongQueue**: a thread-confinement assertion failed
//!
//! [`dispose`]: crate::SerialQueue::dispose

use std::any::Any;
use std::fmt;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The queue has been disposed; no further submissions are accepted.
    Disposed,
    /// The current thread is not executing a work item of this queue.
    WrongQueue,
}

impl ErrorKind {
    /// Returns a human-readable name for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disposed => "disposed",
            Self::WrongQueue => "wrong queue",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error raised by a queue operation.
///
/// Carries the [`ErrorKind`] plus the name of the operation that
/// observed it, so `Display` output identifies the failing call site
/// without allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    op: &'static str,
}

impl Error {
    /// Creates a `Disposed` error observed by `op`.
    #[must_use]
    pub(crate) const fn disposed(op: &'static str) -> Self {
        Self {
            kind: ErrorKind::Disposed,
            op,
        }
    }

    /// Creates a `WrongQueue` error observed by `op`.
    #[must_use]
    pub(crate) const fn wrong_queue(op: &'static str) -> Self {
        Self {
            kind: ErrorKind::WrongQueue,
            op,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this is a `Disposed` error.
    #[must_use]
    pub const fn is_disposed(&self) -> bool {
        matches!(self.kind, ErrorKind::Disposed)
    }

    /// Returns true if this is a `WrongQueue` error.
    #[must_use]
    pub const fn is_wrong_queue(&self) -> bool {
        matches!(self.kind, ErrorKind::WrongQueue)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Disposed => write!(f, "queue is disposed ({})", self.op),
            ErrorKind::WrongQueue => {
                write!(f, "not running on the expected queue ({})", self.op)
            }
        }
    }
}

impl std::error::Error for Error {}

/// A captured panic from an asynchronous work item.
///
/// Wraps the raw panic payload and extracts a message when the payload
/// is a string (the common case for `panic!("...")`). Delivered to the
/// sink registered via [`on_unhandled_error`]; if no sink is installed
/// the payload is logged and dropped.
///
/// [`on_unhandled_error`]: crate::SerialQueue::on_unhandled_error
pub struct PanicPayload {
    payload: Box<dyn Any + Send>,
}

impl PanicPayload {
    pub(crate) fn new(payload: Box<dyn Any + Send>) -> Self {
        Self { payload }
    }

    /// Returns the panic message when the payload is a string.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        if let Some(s) = self.payload.downcast_ref::<&'static str>() {
            Some(s)
        } else if let Some(s) = self.payload.downcast_ref::<String>() {
            Some(s.as_str())
        } else {
            None
        }
    }

    /// Consumes the wrapper, returning the raw payload for re-raising
    /// or further downcasting.
    #[must_use]
    pub fn into_inner(self) -> Box<dyn Any + Send> {
        self.payload
    }
}

impl fmt::Debug for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicPayload")
            .field("message", &self.message())
            .finish()
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "work item panicked: {msg}"),
            None => f.write_str("work item panicked with a non-string payload"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::begin;

    #[test]
    fn display_identifies_operation() {
        begin("display_identifies_operation");
        let err = Error::disposed("submit_async");
        let text = err.to_string();
        crate::check!(text.contains("submit_async"), "display names the operation");
        crate::check!(err.is_disposed(), "kind is disposed");
    }

    #[test]
    fn wrong_queue_kind() {
        begin("wrong_queue_kind");
        let err = Error::wrong_queue("verify_on_queue");
        crate::check_eq!(err.kind(), ErrorKind::WrongQueue, "kind is wrong queue");
        crate::check!(!err.is_disposed(), "wrong queue is not disposed");
    }

    #[test]
    fn panic_payload_extracts_static_str() {
        begin("panic_payload_extracts_static_str");
        let payload = PanicPayload::new(Box::new("boom"));
        crate::check_eq!(payload.message(), Some("boom"), "static str message");
    }

    #[test]
    fn panic_payload_extracts_string() {
        begin("panic_payload_extracts_string");
        let payload = PanicPayload::new(Box::new(String::from("boom owned")));
        crate::check_eq!(payload.message(), Some("boom owned"), "owned string message");
    }

    #[test]
    fn panic_payload_non_string_is_opaque() {
        begin("panic_payload_non_string_is_opaque");
        let payload = PanicPayload::new(Box::new(17_u32));
        crate::check!(
            payload.message().is_none(),
            "non-string payload has no message"
        );
        let inner = payload.into_inner();
        let value = inner.downcast_ref::<u32>().copied();
        crate::check_eq!(value, Some(17), "payload recoverable via into_inner");
    }
}
