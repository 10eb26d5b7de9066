//! Process-wide shutdown flag.
//!
//! Cloned into the main loop, the dispatchers' startup wait, background
//! client threads and the navigation server. Set once from the Ctrl-C
//! handler (or by tests) and never cleared.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cloneable handle to the shared shutdown flag.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal shutdown.
    pub fn signal(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Check if shutdown is signaled.
    pub fn is_signaled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Inverse of [`is_signaled`](Self::is_signaled).
    pub fn is_running(&self) -> bool {
        !self.is_signaled()
    }
}
