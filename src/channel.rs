//! Fixed-capacity FIFO with blocking push and pop.
//!
//! Producers park on `not_full` while the buffer is at capacity, consumers
//! park on `not_empty` while it is empty. Both sides are woken one at a time:
//! every push frees exactly one consumer, every pop exactly one producer.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, Weak};

use tracing::trace;

use crate::cancel::Wake;
use crate::error::SyncError;
use crate::monitor::{lock, wait_while, Wait};

struct ChannelInner<T> {
    capacity: usize,
    queue: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T: Send> Wake for ChannelInner<T> {
    fn wake_all(&self) {
        let _queue = lock(&self.queue);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

/// A bounded FIFO shared by cloning.
pub struct BoundedChannel<T> {
    inner: Arc<ChannelInner<T>>,
}

impl<T> Clone for BoundedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A push that gave up; the value is handed back.
pub struct PushError<T> {
    pub value: T,
    pub reason: SyncError,
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushError")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "push failed: {}", self.reason)
    }
}

impl<T> std::error::Error for PushError<T> {}

impl<T: Send + 'static> BoundedChannel<T> {
    /// # Panics
    ///
    /// If `capacity` is zero: nothing could ever be pushed.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "a bounded channel needs room for at least one value");
        Self {
            inner: Arc::new(ChannelInner {
                capacity,
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
        }
    }

    /// Appends `value`, blocking while the channel is full.
    pub fn push(&self, value: T) {
        if let Err(err) = self.push_with(value, Wait::forever()) {
            unreachable!("a wait with no deadline and no token ended early: {}", err.reason);
        }
    }

    /// Appends `value` unless the wait times out or is cancelled first.
    pub fn push_with(&self, value: T, wait: Wait<'_>) -> Result<(), PushError<T>> {
        let capacity = self.inner.capacity;
        let guard = lock(&self.inner.queue);
        let mut queue = match wait_while(&self.inner.not_full, guard, &wait, self.waker(), |q| {
            q.len() >= capacity
        }) {
            Ok(queue) => queue,
            Err(reason) => return Err(PushError { value, reason }),
        };
        queue.push_back(value);
        assert!(queue.len() <= capacity, "bounded channel overfilled");
        trace!(len = queue.len(), capacity, "pushed");
        self.inner.not_empty.notify_one();
        Ok(())
    }

    /// Removes the oldest value, blocking while the channel is empty.
    pub fn pop(&self) -> T {
        match self.pop_with(Wait::forever()) {
            Ok(value) => value,
            Err(err) => unreachable!("a wait with no deadline and no token ended early: {err}"),
        }
    }

    /// Removes the oldest value unless the wait times out or is cancelled
    /// first. A failed pop leaves the channel as it was.
    pub fn pop_with(&self, wait: Wait<'_>) -> Result<T, SyncError> {
        let guard = lock(&self.inner.queue);
        let mut queue =
            wait_while(&self.inner.not_empty, guard, &wait, self.waker(), |q| q.is_empty())?;
        let value = queue.pop_front().ok_or(SyncError::Exhausted)?;
        trace!(len = queue.len(), "popped");
        self.inner.not_full.notify_one();
        Ok(value)
    }

    fn waker(&self) -> Weak<dyn Wake> {
        Arc::downgrade(&self.inner) as Weak<dyn Wake>
    }
}

impl<T> BoundedChannel<T> {
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.inner.capacity
    }

    /// Free slots right now.
    pub fn remaining_capacity(&self) -> usize {
        self.inner.capacity - self.len()
    }
}

impl<T> fmt::Debug for BoundedChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedChannel")
            .field("capacity", &self.inner.capacity)
            .field("len", &self.len())
            .finish()
    }
}
