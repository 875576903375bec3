use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Cooperative stop flag for the sync worker.
///
/// The worker sleeps between ticks with [`ShutdownSignal::wait`], which
/// returns as soon as the signal is triggered instead of finishing the
/// interval.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    triggered: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop and wake every waiter
    pub fn trigger(&self) {
        let _guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
        self.triggered.store(true, Ordering::SeqCst);
        self.condvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Sleep for `interval` or until triggered.
    ///
    /// Returns `true` when the wait ended because of a stop request.
    pub fn wait(&self, interval: Duration) -> bool {
        let guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_triggered() {
            return true;
        }
        // Poisoning only means another waiter panicked; the flag is still authoritative
        let _ = self
            .condvar
            .wait_timeout_while(guard, interval, |_| !self.is_triggered())
            .unwrap_or_else(PoisonError::into_inner);
        self.is_triggered()
    }
}
