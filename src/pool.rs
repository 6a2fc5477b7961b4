//! Counted resource pool guarded by a single monitor.
//!
//! Philosophers call [`ResourcePool::try_consume`] to take one sweet. The
//! call parks on a condition variable while the pool is empty but may still
//! be refilled, and fails with [`SyncError::Exhausted`] once no further unit
//! can ever be handed out.

use std::sync::{Arc, Condvar, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::cancel::Wake;
use crate::error::SyncError;
use crate::monitor::{lock, wait_while, Wait};

/// When a pool stops handing out units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// One-shot pool: finished as soon as `remaining` reaches zero. Refills
    /// are refused.
    #[default]
    Exhaustion,
    /// Finished once this many units have been consumed over the pool's
    /// lifetime. The pool must be refilled with [`ResourcePool::replenish`]
    /// for consumers to get there.
    ConsumptionTarget(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub total: u64,
    pub remaining: u64,
    pub consumed: u64,
    pub closed: bool,
}

#[derive(Debug)]
struct PoolState {
    remaining: u64,
    consumed: u64,
    closed: bool,
}

impl PoolState {
    fn finished(&self, termination: Termination) -> bool {
        self.closed
            || match termination {
                Termination::Exhaustion => self.remaining == 0,
                Termination::ConsumptionTarget(target) => self.consumed >= target,
            }
    }
}

struct PoolInner {
    total: u64,
    termination: Termination,
    state: Mutex<PoolState>,
    /// Consumers park here while the pool is empty.
    available: Condvar,
    /// The refiller parks here while the pool still has units.
    drained: Condvar,
}

impl Wake for PoolInner {
    fn wake_all(&self) {
        let _state = lock(&self.state);
        self.available.notify_all();
        self.drained.notify_all();
    }
}

/// Cheap to clone; clones share the same monitor.
#[derive(Clone)]
pub struct ResourcePool {
    inner: Arc<PoolInner>,
}

impl ResourcePool {
    /// A full pool of `total` units.
    pub fn new(total: u64, termination: Termination) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                total,
                termination,
                state: Mutex::new(PoolState {
                    remaining: total,
                    consumed: 0,
                    closed: false,
                }),
                available: Condvar::new(),
                drained: Condvar::new(),
            }),
        }
    }

    pub fn one_shot(total: u64) -> Self {
        Self::new(total, Termination::Exhaustion)
    }

    pub fn total(&self) -> u64 {
        self.inner.total
    }

    pub fn termination(&self) -> Termination {
        self.inner.termination
    }

    /// Takes one unit, blocking while the pool is empty but not finished.
    ///
    /// Returns the number of units left after this one.
    pub fn try_consume(&self) -> Result<u64, SyncError> {
        self.try_consume_with(Wait::forever())
    }

    /// [`try_consume`](Self::try_consume) with a deadline and/or cancel token.
    /// A timed-out or cancelled call leaves the pool untouched.
    pub fn try_consume_with(&self, wait: Wait<'_>) -> Result<u64, SyncError> {
        let termination = self.inner.termination;
        let guard = lock(&self.inner.state);
        let mut state = wait_while(&self.inner.available, guard, &wait, self.waker(), |s| {
            s.remaining == 0 && !s.finished(termination)
        })?;

        if state.finished(termination) {
            return Err(SyncError::Exhausted);
        }
        debug_assert!(state.remaining > 0 && state.remaining <= self.inner.total);
        state.remaining -= 1;
        state.consumed += 1;
        trace!(remaining = state.remaining, consumed = state.consumed, "unit consumed");

        if state.finished(termination) {
            debug!(consumed = state.consumed, "pool finished, waking every waiter");
            self.inner.available.notify_all();
            self.inner.drained.notify_all();
        } else if state.remaining > 0 {
            self.inner.available.notify_one();
        } else {
            self.inner.drained.notify_one();
        }
        Ok(state.remaining)
    }

    /// Non-blocking: is the pool empty right now?
    pub fn is_exhausted(&self) -> bool {
        lock(&self.inner.state).remaining == 0
    }

    /// Non-blocking: will every further consumption fail?
    pub fn is_finished(&self) -> bool {
        lock(&self.inner.state).finished(self.inner.termination)
    }

    /// Puts `units` back. Fails if that would exceed the pool's capacity, if
    /// `units` is zero, or if the pool is already finished.
    pub fn replenish(&self, units: u64) -> Result<u64, SyncError> {
        let mut state = lock(&self.inner.state);
        if state.finished(self.inner.termination) {
            return Err(SyncError::Exhausted);
        }
        if units == 0 {
            return Err(SyncError::EmptyRefill);
        }
        let refilled = state
            .remaining
            .checked_add(units)
            .filter(|&n| n <= self.inner.total)
            .ok_or(SyncError::OverCapacity {
                requested: units,
                remaining: state.remaining,
                total: self.inner.total,
            })?;
        state.remaining = refilled;
        debug!(units, remaining = refilled, "pool replenished");

        if units == 1 {
            self.inner.available.notify_one();
        } else {
            self.inner.available.notify_all();
        }
        Ok(refilled)
    }

    /// Blocks until the pool is empty, for whoever refills it.
    pub fn wait_drained(&self, wait: Wait<'_>) -> Result<(), SyncError> {
        let termination = self.inner.termination;
        let guard = lock(&self.inner.state);
        let state = wait_while(&self.inner.drained, guard, &wait, self.waker(), |s| {
            s.remaining > 0 && !s.finished(termination)
        })?;
        if state.finished(termination) {
            Err(SyncError::Exhausted)
        } else {
            Ok(())
        }
    }

    /// Finishes the pool regardless of its termination mode.
    pub fn close(&self) {
        let mut state = lock(&self.inner.state);
        state.closed = true;
        self.inner.available.notify_all();
        self.inner.drained.notify_all();
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = lock(&self.inner.state);
        PoolSnapshot {
            total: self.inner.total,
            remaining: state.remaining,
            consumed: state.consumed,
            closed: state.closed,
        }
    }

    fn waker(&self) -> Weak<dyn Wake> {
        Arc::downgrade(&self.inner) as Weak<dyn Wake>
    }
}
