//! External stop signal for blocked waiters.
//!
//! A [`CancelToken`] is shared by everything that should stop together. A
//! monitor that parks a thread registers itself with the token for the
//! duration of the wait; [`CancelToken::cancel`] then wakes every registered
//! monitor so its waiters can observe the flag and leave.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use crate::monitor::lock;

/// Implemented by monitors that can wake all of their parked threads.
///
/// `wake_all` must take the monitor's own mutex before notifying, otherwise a
/// waiter that checked the flag but has not parked yet misses the wake-up.
pub(crate) trait Wake: Send + Sync {
    fn wake_all(&self);
}

#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    parked: Mutex<Vec<(u64, Weak<dyn Wake>)>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag and wakes every monitor with a registered waiter.
    /// Calling it again is a no-op.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        // Collect first: wake_all takes monitor locks, which must never be
        // acquired while holding the registry lock.
        let targets: Vec<Arc<dyn Wake>> = lock(&self.inner.parked)
            .iter()
            .filter_map(|(_, waker)| waker.upgrade())
            .collect();
        debug!(monitors = targets.len(), "cancellation requested");
        for target in targets {
            target.wake_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn register(&self, waker: Weak<dyn Wake>) -> Registration<'_> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.parked).push((id, waker));
        Registration { token: self, id }
    }

    #[cfg(test)]
    fn registered(&self) -> usize {
        lock(&self.inner.parked).len()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Removes a monitor from the token when the wait it covers ends.
pub(crate) struct Registration<'a> {
    token: &'a CancelToken,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        lock(&self.token.inner.parked).retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter(AtomicUsize);

    impl Wake for Counter {
        fn wake_all(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cancel_wakes_registered_monitors_once() {
        let token = CancelToken::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let waker: Weak<dyn Wake> = Arc::downgrade(&counter) as Weak<dyn Wake>;
        let _registration = token.register(waker);

        token.cancel();
        token.cancel();

        assert!(token.is_cancelled());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registration_is_removed_on_drop() {
        let token = CancelToken::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        {
            let waker: Weak<dyn Wake> = Arc::downgrade(&counter) as Weak<dyn Wake>;
            let _registration = token.register(waker);
            assert_eq!(token.registered(), 1);
        }
        assert_eq!(token.registered(), 0);

        token.cancel();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
