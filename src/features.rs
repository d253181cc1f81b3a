//! Feature flags controlling optional queue behavior.

/// Feature bits for a [`SerialQueue`](crate::SerialQueue).
///
/// Currently one flag is recognized:
///
/// - [`COOPERATIVE_CONTINUATIONS`](Self::COOPERATIVE_CONTINUATIONS):
///   install the continuation adapter while draining, so futures driven
///   by [`spawn`](crate::SerialQueue::spawn) resume on the queue across
///   suspension points. On by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueFeatures(u8);

impl QueueFeatures {
    /// No optional behavior.
    pub const NONE: QueueFeatures = Self(0);

    /// Route awaited continuations back through the originating queue.
    pub const COOPERATIVE_CONTINUATIONS: QueueFeatures = Self(0b1);

    /// Returns true if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: QueueFeatures) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `self` with the bits of `other` added.
    #[must_use]
    pub const fn with(self, other: QueueFeatures) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns `self` with the bits of `other` removed.
    #[must_use]
    pub const fn without(self, other: QueueFeatures) -> Self {
        Self(self.0 & !other.0)
    }
}

impl Default for QueueFeatures {
    fn default() -> Self {
        Self::COOPERATIVE_CONTINUATIONS
    }
}
