//! Cancellation for in-flight HTTP generations
//!
//! Each HTTP client owns one slot. A generation registers itself when it starts
//! and `abort()` cancels whatever is registered.

use futures::future::{AbortHandle, AbortRegistration};
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct AbortSlot {
    current: Mutex<Option<AbortHandle>>,
}

impl AbortSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new generation, replacing any previous one
    pub fn begin(&self) -> AbortRegistration {
        let (handle, registration) = AbortHandle::new_pair();
        *self.current.lock() = Some(handle);
        registration
    }

    /// Cancel the registered generation; returns whether there was one
    pub fn abort(&self) -> bool {
        match self.current.lock().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Forget the registered generation once it has ended
    pub fn clear(&self) {
        self.current.lock().take();
    }

    pub fn is_active(&self) -> bool {
        self.current.lock().is_some()
    }
}
