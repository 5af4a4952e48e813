use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::Notify;

/// The error shape a `BrowserDriver` implementation returns (spec §1: the
/// driver itself is out of scope, named only by contract). The session
/// manager translates this into a stable `ActionError` code.
#[derive(Debug, Clone, thiserror::Error)]
#[error("driver error [{code}]: {message}")]
pub struct BrowserDriverError {
    pub code: &'static str,
    pub message: String,
}

impl BrowserDriverError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A cheap, clonable cooperative-cancellation handle threaded through every
/// session operation (spec §5, §9). Cancelling is a one-way transition: once
/// signaled, every clone observes it, and `notified()` resolves for tasks
/// racing an in-flight driver call.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel()` has been called. If already cancelled,
    /// resolves immediately on the next poll.
    pub async fn cancelled(&self) {
        // Must register with `Notify` before checking the flag: otherwise a
        // `cancel()` landing between the check and the `.notified()` call
        // fires `notify_waiters()` with nobody parked to observe it, and this
        // call then awaits a notification that already happened.
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
