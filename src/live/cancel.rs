//! Cooperative cancellation for a single acquisition session.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Ownership token for the currently scheduled grab.
///
/// Cancellation is cooperative: nothing interrupts an in-flight iteration,
/// the token is checked at well-defined re-entry points and it wakes the
/// scheduler out of its inter-grab wait.
#[derive(Debug, Clone)]
pub(crate) struct SessionToken {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    cancelled: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl SessionToken {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                cancelled: AtomicBool::new(false),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        // Lock briefly to synchronize with a waiter between its flag check
        // and its wait.
        let _guard = self.shared.mutex.lock();
        self.shared.condvar.notify_all();
    }

    pub fn cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep up to `timeout`, waking early on cancellation. Returns whether
    /// the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.cancelled() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.shared.mutex.lock();
        while !self.cancelled() {
            if self
                .shared
                .condvar
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                break;
            }
        }
        self.cancelled()
    }
}
