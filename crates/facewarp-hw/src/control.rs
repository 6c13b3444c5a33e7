//! Cooperative cancellation shared between pipeline stages and signal handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Clone-safe stop flag. Stages poll it once per produced item.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request every stage holding a clone of this token to stop.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
