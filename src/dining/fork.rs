use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::cancel::Wake;
use crate::error::SyncError;
use crate::monitor::{lock, wait_while, Wait};

/// Who gets a fork next when several philosophers are waiting for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fairness {
    /// Whoever wins the race after a release, including a newcomer.
    #[default]
    Barging,
    /// Strict arrival order, using tickets.
    Fifo,
}

#[derive(Debug, Default)]
struct ForkState {
    holder: Option<usize>,
    next_ticket: u64,
    now_serving: u64,
    /// Tickets whose owners gave up waiting.
    abandoned: BTreeSet<u64>,
}

impl ForkState {
    fn skip_abandoned(&mut self) {
        while self.abandoned.remove(&self.now_serving) {
            self.now_serving += 1;
        }
    }
}

struct ForkInner {
    id: usize,
    name: String,
    fairness: Fairness,
    state: Mutex<ForkState>,
    released: Condvar,
}

impl Wake for ForkInner {
    fn wake_all(&self) {
        let _state = lock(&self.state);
        self.released.notify_all();
    }
}

/// An exclusive lock that knows which worker holds it.
///
/// Forks are ordered by `id`; the global acquisition order used to avoid
/// deadlock is ascending id.
#[derive(Clone)]
pub struct Fork {
    inner: Arc<ForkInner>,
}

impl Fork {
    pub fn new(id: usize, name: impl Into<String>) -> Self {
        Self::with_fairness(id, name, Fairness::Barging)
    }

    pub fn with_fairness(id: usize, name: impl Into<String>, fairness: Fairness) -> Self {
        Self {
            inner: Arc::new(ForkInner {
                id,
                name: name.into(),
                fairness,
                state: Mutex::new(ForkState::default()),
                released: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn fairness(&self) -> Fairness {
        self.inner.fairness
    }

    /// Worker currently holding the fork.
    pub fn holder(&self) -> Option<usize> {
        lock(&self.inner.state).holder
    }

    /// Blocks until `worker` owns the fork. The fork is released when the
    /// returned guard is dropped, including during unwinding.
    pub fn acquire(&self, worker: usize, wait: Wait<'_>) -> Result<ForkGuard<'_>, SyncError> {
        let waker = Arc::downgrade(&self.inner) as Weak<dyn Wake>;
        let mut state = lock(&self.inner.state);

        match self.inner.fairness {
            Fairness::Barging => {
                let mut state =
                    wait_while(&self.inner.released, state, &wait, waker, |s| s.holder.is_some())?;
                state.holder = Some(worker);
            }
            Fairness::Fifo => {
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                let granted = wait_while(&self.inner.released, state, &wait, waker, |s| {
                    s.holder.is_some() || s.now_serving != ticket
                });
                match granted {
                    Ok(mut state) => state.holder = Some(worker),
                    Err(err) => {
                        self.abandon(ticket);
                        return Err(err);
                    }
                }
            }
        }
        trace!(fork = %self.inner.name, worker, "picked up");
        Ok(ForkGuard { fork: self, worker })
    }

    /// Takes the fork only if nobody holds it and, for a FIFO fork, nobody
    /// is queued for it.
    pub fn try_acquire(&self, worker: usize) -> Option<ForkGuard<'_>> {
        let mut state = lock(&self.inner.state);
        if state.holder.is_some() {
            return None;
        }
        if self.inner.fairness == Fairness::Fifo {
            if state.now_serving != state.next_ticket {
                return None;
            }
            state.next_ticket += 1;
        }
        state.holder = Some(worker);
        Some(ForkGuard { fork: self, worker })
    }

    fn abandon(&self, ticket: u64) {
        let mut state = lock(&self.inner.state);
        state.abandoned.insert(ticket);
        if state.holder.is_none() {
            state.skip_abandoned();
        }
        self.inner.released.notify_all();
    }

    fn release(&self, worker: usize) {
        let mut state = lock(&self.inner.state);
        debug_assert_eq!(state.holder, Some(worker), "fork released by a non-holder");
        state.holder = None;
        match self.inner.fairness {
            Fairness::Barging => self.inner.released.notify_one(),
            Fairness::Fifo => {
                state.now_serving += 1;
                state.skip_abandoned();
                self.inner.released.notify_all();
            }
        }
        trace!(fork = %self.inner.name, worker, "put down");
    }
}

impl fmt::Debug for Fork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fork")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("fairness", &self.inner.fairness)
            .finish()
    }
}

/// Proof of ownership; dropping it puts the fork back on the table.
#[must_use = "the fork is released as soon as the guard is dropped"]
pub struct ForkGuard<'a> {
    fork: &'a Fork,
    worker: usize,
}

impl ForkGuard<'_> {
    pub fn fork(&self) -> &Fork {
        self.fork
    }
}

impl Drop for ForkGuard<'_> {
    fn drop(&mut self) {
        self.fork.release(self.worker);
    }
}
