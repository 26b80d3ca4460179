//! Per-job cancellation token.
//!
//! A token is plain data: the coordinator creates one per job and hands a
//! clone to the submitter. Nothing ties it to a request lifetime, and dropping
//! a clone never cancels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared, clonable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal that the result is no longer wanted. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
