use std::any::Any;

use crate::error::SyncError;

/// How a worker's loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Stopped because there was nothing left to consume.
    Finished,
    /// Stopped by the shared shutdown signal.
    Cancelled,
    Failed(SyncError),
    Panicked(String),
}

impl From<SyncError> for WorkerExit {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Exhausted => WorkerExit::Finished,
            SyncError::Cancelled => WorkerExit::Cancelled,
            SyncError::WorkerPanicked { message, .. } => WorkerExit::Panicked(message),
            other => WorkerExit::Failed(other),
        }
    }
}

/// Per-worker result collected after join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTally {
    pub name: String,
    pub consumed: u64,
    /// Times the worker let go of a held fork to retry later.
    pub backoffs: u64,
    pub exit: WorkerExit,
}

impl WorkerTally {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            consumed: 0,
            backoffs: 0,
            exit: WorkerExit::Finished,
        }
    }

    pub(crate) fn panicked(name: impl Into<String>, payload: Box<dyn Any + Send>) -> Self {
        let mut tally = Self::new(name);
        tally.exit = WorkerExit::Panicked(panic_message(payload.as_ref()));
        tally
    }

    pub fn finished(&self) -> bool {
        self.exit == WorkerExit::Finished
    }
}

pub fn total_consumed(tallies: &[WorkerTally]) -> u64 {
    tallies.iter().map(|t| t.consumed).sum()
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
