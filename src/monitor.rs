//! Monitor plumbing shared by the pool, the forks and the channel.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::cancel::{CancelToken, Wake};
use crate::error::SyncError;

/// Locks `mutex`, recovering the guard if a previous holder panicked.
///
/// Monitor state in this crate is only ever changed through checked
/// arithmetic, so a panic elsewhere cannot leave it half-updated.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("mutex poisoned by a panicking thread, recovering");
        poisoned.into_inner()
    })
}

/// How long a blocking call may park and what may interrupt it.
///
/// ```
/// use std::time::Duration;
/// use dining_monitors::{CancelToken, Wait};
///
/// let shutdown = CancelToken::new();
/// let wait = Wait::timeout(Duration::from_secs(2)).or_cancel(&shutdown);
/// assert!(wait.deadline().is_some());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Wait<'a> {
    deadline: Option<Instant>,
    cancel: Option<&'a CancelToken>,
}

impl<'a> Wait<'a> {
    /// Park until the condition holds, however long that takes.
    pub fn forever() -> Self {
        Self::default()
    }

    /// Give up after `timeout`. `Duration::ZERO` makes the call non-blocking.
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            cancel: None,
        }
    }

    pub fn until(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    pub fn cancellable(token: &'a CancelToken) -> Self {
        Self::forever().or_cancel(token)
    }

    pub fn or_cancel(mut self, token: &'a CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(CancelToken::is_cancelled)
    }
}

/// Parks on `condvar` while `blocked` holds, re-checking after every wake-up.
///
/// Returns the guard with the condition cleared, or the reason the wait was
/// abandoned. A waiter that leaves early while the condition is already
/// clear hands its wake-up to the next waiter, so a `notify_one` aimed at it
/// is never lost.
pub(crate) fn wait_while<'m, T, F>(
    condvar: &Condvar,
    mut guard: MutexGuard<'m, T>,
    wait: &Wait<'_>,
    waker: Weak<dyn Wake>,
    mut blocked: F,
) -> Result<MutexGuard<'m, T>, SyncError>
where
    F: FnMut(&mut T) -> bool,
{
    let started = Instant::now();
    let _registration = wait.cancel.map(|token| token.register(waker));

    loop {
        if wait.cancelled() {
            return Err(abandon(condvar, &mut *guard, &mut blocked, SyncError::Cancelled));
        }
        if !blocked(&mut *guard) {
            return Ok(guard);
        }
        guard = match wait.deadline {
            None => condvar.wait(guard).unwrap_or_else(PoisonError::into_inner),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    let reason = SyncError::TimedOut {
                        waited: now - started,
                    };
                    return Err(abandon(condvar, &mut *guard, &mut blocked, reason));
                }
                condvar
                    .wait_timeout(guard, deadline - now)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|poisoned| poisoned.into_inner().0)
            }
        };
    }
}

fn abandon<T, F>(condvar: &Condvar, guard: &mut T, blocked: &mut F, reason: SyncError) -> SyncError
where
    F: FnMut(&mut T) -> bool,
{
    if !blocked(guard) {
        condvar.notify_one();
    }
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    struct Flag {
        raised: Mutex<bool>,
        changed: Condvar,
    }

    impl Wake for Flag {
        fn wake_all(&self) {
            let _guard = lock(&self.raised);
            self.changed.notify_all();
        }
    }

    impl Flag {
        fn new() -> Arc<Self> {
            Arc::new(Flag {
                raised: Mutex::new(false),
                changed: Condvar::new(),
            })
        }

        fn await_raised(self: &Arc<Self>, wait: Wait<'_>) -> Result<(), SyncError> {
            let waker: Weak<dyn Wake> = Arc::downgrade(self) as Weak<dyn Wake>;
            let guard = lock(&self.raised);
            wait_while(&self.changed, guard, &wait, waker, |raised| !*raised).map(|_| ())
        }

        fn raise(&self) {
            *lock(&self.raised) = true;
            self.changed.notify_all();
        }
    }

    #[test]
    fn test_returns_immediately_when_condition_holds() {
        let flag = Flag::new();
        flag.raise();
        assert_eq!(flag.await_raised(Wait::timeout(Duration::ZERO)), Ok(()));
    }

    #[test]
    fn test_times_out_when_nobody_signals() {
        let flag = Flag::new();
        let err = flag
            .await_raised(Wait::timeout(Duration::from_millis(30)))
            .unwrap_err();
        match err {
            SyncError::TimedOut { waited } => assert!(waited >= Duration::from_millis(25)),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_deadline_in_the_past_times_out_at_once() {
        let flag = Flag::new();
        let past = Instant::now();
        thread::sleep(Duration::from_millis(5));

        let wait = Wait::until(past);
        assert_eq!(wait.deadline(), Some(past));
        assert!(flag.await_raised(wait).unwrap_err().is_timeout());

        // An absolute deadline still lets a satisfied condition through.
        flag.raise();
        assert_eq!(flag.await_raised(Wait::until(past)), Ok(()));
    }

    #[test]
    fn test_signal_releases_waiter() {
        let flag = Flag::new();
        let waiter = {
            let flag = Arc::clone(&flag);
            thread::spawn(move || flag.await_raised(Wait::timeout(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(20));
        flag.raise();
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }

    #[test]
    fn test_cancel_interrupts_blocked_waiter() {
        let flag = Flag::new();
        let token = CancelToken::new();
        let waiter = {
            let flag = Arc::clone(&flag);
            let token = token.clone();
            thread::spawn(move || flag.await_raised(Wait::cancellable(&token)))
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert_eq!(waiter.join().unwrap(), Err(SyncError::Cancelled));
    }

    #[test]
    fn test_recovers_from_poisoned_mutex() {
        let shared = Arc::new(Mutex::new(7));
        let poisoner = Arc::clone(&shared);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poisoning the mutex on purpose");
        })
        .join();

        assert!(shared.is_poisoned());
        assert_eq!(*lock(&shared), 7);
    }
}
