//! Cooperative cancellation for pyramid construction.

use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag polled by the pyramid builders between 1-D sweeps.
///
/// Cancellation is coarse-grained: a worker notices the flag at the next
/// sweep boundary, discards its partial pyramid, and the registration call
/// reports [`crate::RegError::Cancelled`].
#[derive(Debug, Default)]
pub struct CancelToken {
    flag: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call from any thread.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
