//! Cancellation handle for an in-flight request.
//!
//! # Design
//! A request may run several attempts when its completion strategy asks for
//! a retry. Each attempt gets its own token, a child of one root token owned
//! by the handle. Cancelling the handle cancels the root, which cancels the
//! current attempt and every attempt started afterwards, so a retry that
//! races with `cancel()` cannot escape it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Handle returned to the caller of a request.
#[derive(Debug, Clone)]
pub struct ServiceCancellable {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    root: CancellationToken,
    current: Mutex<CancellationToken>,
    attempts: AtomicUsize,
}

impl Default for ServiceCancellable {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceCancellable {
    pub fn new() -> Self {
        let root = CancellationToken::new();
        let current = root.child_token();
        Self {
            inner: Arc::new(Inner {
                root,
                current: Mutex::new(current),
                attempts: AtomicUsize::new(0),
            }),
        }
    }

    /// Cancels the request. Takes effect immediately for
    /// [`is_cancelled`](Self::is_cancelled).
    pub fn cancel(&self) {
        self.inner.root.cancel();
        self.inner.current.lock().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.root.is_cancelled()
    }

    /// Number of attempts started so far.
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::Acquire)
    }

    /// Replaces the current attempt token with a fresh child of the root and
    /// returns it.
    pub(crate) fn install_attempt(&self) -> CancellationToken {
        let token = self.inner.root.child_token();
        *self.inner.current.lock() = token.clone();
        self.inner.attempts.fetch_add(1, Ordering::AcqRel);
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_visible_immediately() {
        let cancellable = ServiceCancellable::new();
        assert!(!cancellable.is_cancelled());
        cancellable.cancel();
        assert!(cancellable.is_cancelled());
    }

    #[test]
    fn cancel_reaches_the_current_attempt() {
        let cancellable = ServiceCancellable::new();
        let attempt = cancellable.install_attempt();
        assert!(!attempt.is_cancelled());
        cancellable.clone().cancel();
        assert!(attempt.is_cancelled());
    }

    #[test]
    fn attempts_after_cancel_start_cancelled() {
        let cancellable = ServiceCancellable::new();
        let first = cancellable.install_attempt();
        cancellable.cancel();
        let second = cancellable.install_attempt();
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert_eq!(cancellable.attempts(), 2);
    }

    #[test]
    fn replaced_attempts_are_independent_until_cancel() {
        let cancellable = ServiceCancellable::new();
        let first = cancellable.install_attempt();
        let second = cancellable.install_attempt();
        first.cancel();
        assert!(!second.is_cancelled());
        assert!(!cancellable.is_cancelled());
    }
}
