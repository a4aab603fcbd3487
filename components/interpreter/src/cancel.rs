//! Cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag a host sets to stop a running VM.
///
/// The interpreter observes the flag at the next safe point, unwinds every
/// frame and returns `Cancelled`. The flag is cleared when that happens so
/// the VM can run again.
///
/// # Examples
///
/// ```
/// use interpreter::CancelHandle;
///
/// let handle = CancelHandle::new();
/// let remote = handle.clone();
/// std::thread::spawn(move || remote.cancel()).join().unwrap();
/// assert!(handle.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Create an unset handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Check if cancellation was requested
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Clear a pending request
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}
