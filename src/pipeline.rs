//! Sentinel-terminated producer/consumer protocol over a [`BoundedChannel`].
//!
//! The producer pushes its values followed by one reserved sentinel. The
//! consumer drains until it sees the sentinel and never hands it on.

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::cancel::CancelToken;
use crate::channel::BoundedChannel;
use crate::error::SyncError;
use crate::monitor::Wait;

/// Pushes every value, then `sentinel`. Returns how many domain values were
/// sent.
///
/// A value equal to the sentinel is refused before it is pushed; the values
/// already sent stay in the channel and no sentinel follows them.
pub fn produce<T, I>(
    channel: &BoundedChannel<T>,
    values: I,
    sentinel: &T,
    wait: Wait<'_>,
) -> Result<usize, SyncError>
where
    T: PartialEq + Debug + Clone + Send + 'static,
    I: IntoIterator<Item = T>,
{
    let mut sent = 0;
    for value in values {
        if value == *sentinel {
            return Err(SyncError::ReservedSentinel(format!("{value:?}")));
        }
        channel.push_with(value, wait).map_err(|err| err.reason)?;
        sent += 1;
        debug!(remaining_capacity = channel.remaining_capacity(), "produced one value");
    }
    channel
        .push_with(sentinel.clone(), wait)
        .map_err(|err| err.reason)?;
    debug!(sent, "end of stream sent");
    Ok(sent)
}

/// Pops until the sentinel arrives, calling `each` on every domain value.
/// The sentinel itself is not returned.
pub fn consume_until_sentinel<T, F>(
    channel: &BoundedChannel<T>,
    sentinel: &T,
    wait: Wait<'_>,
    mut each: F,
) -> Result<Vec<T>, SyncError>
where
    T: PartialEq + Send + 'static,
    F: FnMut(&T),
{
    let mut received = Vec::new();
    loop {
        let value = channel.pop_with(wait)?;
        if value == *sentinel {
            debug!(received = received.len(), "end of stream received");
            return Ok(received);
        }
        each(&value);
        received.push(value);
    }
}

// =============================================================================
// Paced producer/consumer run
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport<T> {
    pub produced: usize,
    pub consumed: Vec<T>,
    /// Largest queue length the producer observed.
    pub peak_len: usize,
}

/// One producer thread and one consumer thread joined by a bounded channel.
#[derive(Debug, Clone)]
pub struct Pipeline<T> {
    capacity: usize,
    sentinel: T,
    producer_pause: Duration,
    consumer_pause: Duration,
}

impl<T> Pipeline<T>
where
    T: PartialEq + Debug + Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize, sentinel: T) -> Self {
        Self {
            capacity,
            sentinel,
            producer_pause: Duration::ZERO,
            consumer_pause: Duration::ZERO,
        }
    }

    /// Delay before each push.
    pub fn producer_pause(mut self, pause: Duration) -> Self {
        self.producer_pause = pause;
        self
    }

    /// Delay after each value is consumed.
    pub fn consumer_pause(mut self, pause: Duration) -> Self {
        self.consumer_pause = pause;
        self
    }

    /// Streams `values` from producer to consumer. Either side failing, or
    /// `patience` running out, stops both.
    pub fn run<I>(&self, values: I, patience: Duration) -> Result<PipelineReport<T>, SyncError>
    where
        I: IntoIterator<Item = T> + Send,
    {
        let channel = BoundedChannel::new(self.capacity);
        let shutdown = CancelToken::new();
        let wait = Wait::timeout(patience).or_cancel(&shutdown);
        let peak_len = AtomicUsize::new(0);

        let (produced, consumed) = thread::scope(|s| {
            let consumer = thread::Builder::new()
                .name("C1".into())
                .spawn_scoped(s, || {
                    let consumed = consume_until_sentinel(&channel, &self.sentinel, wait, |value| {
                        trace!(?value, "consumer has consumed one value");
                        if !self.consumer_pause.is_zero() {
                            thread::sleep(self.consumer_pause);
                        }
                    });
                    if consumed.is_err() {
                        shutdown.cancel();
                    }
                    consumed
                })
                .map_err(|err| spawn_error("C1", err))?;

            let producer = thread::Builder::new()
                .name("P1".into())
                .spawn_scoped(s, || {
                    let paced = values.into_iter().inspect(|_| {
                        if !self.producer_pause.is_zero() {
                            thread::sleep(self.producer_pause);
                        }
                        peak_len.fetch_max(channel.len(), Ordering::Relaxed);
                    });
                    let produced = produce(&channel, paced, &self.sentinel, wait);
                    peak_len.fetch_max(channel.len(), Ordering::Relaxed);
                    if produced.is_err() {
                        shutdown.cancel();
                    }
                    produced
                });
            let producer = match producer {
                Ok(handle) => handle,
                Err(err) => {
                    shutdown.cancel();
                    return Err(spawn_error("P1", err));
                }
            };

            let produced = join(producer, "P1");
            let consumed = join(consumer, "C1");
            Ok::<_, SyncError>((produced, consumed))
        })?;

        let report = PipelineReport {
            produced: produced?,
            consumed: consumed?,
            peak_len: peak_len.load(Ordering::Relaxed),
        };
        info!(
            produced = report.produced,
            consumed = report.consumed.len(),
            peak_len = report.peak_len,
            capacity = self.capacity,
            "pipeline drained"
        );
        Ok(report)
    }
}

fn join<R>(
    handle: thread::ScopedJoinHandle<'_, Result<R, SyncError>>,
    name: &str,
) -> Result<R, SyncError> {
    handle.join().unwrap_or_else(|payload| {
        warn!(thread = name, "pipeline thread panicked");
        Err(SyncError::WorkerPanicked {
            worker: name.to_string(),
            message: crate::report::panic_message(payload.as_ref()),
        })
    })
}

fn spawn_error(worker: &str, err: std::io::Error) -> SyncError {
    SyncError::Spawn {
        worker: worker.to_string(),
        reason: err.to_string(),
    }
}
