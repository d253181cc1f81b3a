//! Compatibility shim over the `tracing` macros.
//!
//! With the `tracing` cargo feature enabled (the default) this module
//! re-exports the real `tracing` macros. With the feature disabled the
//! macros expand to nothing, keeping the core free of the dependency
//! without sprinkling `cfg` at every call site.

#[cfg(feature = "tracing")]
pub use tracing::{
    debug, debug_span, error, error_span, info, info_span, trace, trace_span, warn, warn_span,
};

#[cfg(not(feature = "tracing"))]
mod noop {
    /// Expands to nothing; discards its tokens.
    #[doc(hidden)]
    #[macro_export]
    macro_rules! __dispatchq_noop_event {
        ($($arg:tt)*) => {};
    }

    /// Expands to `()`; stands in for a span handle.
    #[doc(hidden)]
    #[macro_export]
    macro_rules! __dispatchq_noop_span {
        ($($arg:tt)*) => {
            ()
        };
    }
}

#[cfg(not(feature = "tracing"))]
pub use crate::{
    __dispatchq_noop_event as debug, __dispatchq_noop_event as error,
    __dispatchq_noop_event as info, __dispatchq_noop_event as trace,
    __dispatchq_noop_event as warn, __dispatchq_noop_span as debug_span,
    __dispatchq_noop_span as error_span, __dispatchq_noop_span as info_span,
    __dispatchq_noop_span as trace_span, __dispatchq_noop_span as warn_span,
};
