//! Shutdown signaling module.
//!
//! A small condition-variable based stop signal. The main run loop blocks in
//! [`ShutdownSignal::wait`] until some thread - typically a signal handler -
//! raises the signal, so shutdown latency is bounded by signal delivery
//! rather than a polling interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// A cloneable one-shot stop signal.
///
/// Raising is idempotent; every waiter wakes up once the signal has been
/// raised, including waiters that arrive afterwards.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

#[derive(Debug, Default)]
struct SignalInner {
    stopping: Mutex<bool>,
    signaled: Condvar,
}

impl ShutdownSignal {
    /// Create a signal in the not-raised state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every waiter.
    pub fn raise(&self) {
        let mut stopping = self
            .inner
            .stopping
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *stopping = true;
        drop(stopping);
        self.inner.signaled.notify_all();
    }

    /// Whether the signal has been raised.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        *self
            .inner
            .stopping
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the signal is raised. Returns immediately if it already
    /// was.
    pub fn wait(&self) {
        let mut stopping = self
            .inner
            .stopping
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*stopping {
            stopping = self
                .inner
                .signaled
                .wait(stopping)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the signal is raised or the timeout elapses. Returns
    /// whether the signal was raised.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut stopping = self
            .inner
            .stopping
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*stopping {
            let Some(remaining) = deadline.checked_duration_since(std::time::Instant::now())
            else {
                return false;
            };
            let (guard, result) = self
                .inner
                .signaled
                .wait_timeout(stopping, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            stopping = guard;
            if result.timed_out() && !*stopping {
                return false;
            }
        }
        true
    }
}

/// Tracks whether the begin-shutdown callbacks have been delivered.
///
/// Delivery must happen at most once even when `begin_shutdown` is invoked
/// from several threads; the flag is claimed with a single atomic swap.
#[derive(Debug, Default)]
pub(crate) struct DeliveryGuard {
    delivered: AtomicBool,
}

impl DeliveryGuard {
    /// Claim delivery. Returns true exactly once.
    pub(crate) fn claim(&self) -> bool {
        !self.delivered.swap(true, Ordering::SeqCst)
    }
}
