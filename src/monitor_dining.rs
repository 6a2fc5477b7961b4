//! Philosophers sharing one bowl through the pool monitor.
//!
//! Each philosopher runs on its own named thread and keeps taking sweets
//! until the pool reports it is finished. With a
//! [`Termination::ConsumptionTarget`] pool an extra `kitchen` thread refills
//! the bowl every time it runs dry.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::cancel::CancelToken;
use crate::error::SyncError;
use crate::monitor::Wait;
use crate::pool::{ResourcePool, Termination};
use crate::report::{total_consumed, WorkerExit, WorkerTally};

pub struct MonitorTable {
    pool: ResourcePool,
    philosophers: Vec<String>,
    think_time: Duration,
    refill_batch: u64,
}

impl MonitorTable {
    /// `count` philosophers named "Philosopher 0", "Philosopher 1", ...
    pub fn new(pool: ResourcePool, count: usize) -> Self {
        let names = (0..count).map(|i| format!("Philosopher {i}")).collect();
        Self::with_names(pool, names)
    }

    pub fn with_names(pool: ResourcePool, philosophers: Vec<String>) -> Self {
        let refill_batch = pool.total().max(1);
        Self {
            pool,
            philosophers,
            think_time: Duration::ZERO,
            refill_batch,
        }
    }

    /// Pause after every sweet, outside the monitor.
    pub fn think_time(mut self, think_time: Duration) -> Self {
        self.think_time = think_time;
        self
    }

    /// Units the kitchen puts back per refill, capped at the pool total.
    pub fn refill_batch(mut self, units: u64) -> Self {
        self.refill_batch = units.clamp(1, self.pool.total().max(1));
        self
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    /// Runs every philosopher to completion and returns their tallies in
    /// seating order. `shutdown` stops everyone early.
    pub fn run(&self, shutdown: &CancelToken) -> Result<Vec<WorkerTally>, SyncError> {
        let tallies = thread::scope(|s| {
            let kitchen = match self.pool.termination() {
                Termination::ConsumptionTarget(_) => {
                    let spawned = thread::Builder::new()
                        .name("kitchen".into())
                        .spawn_scoped(s, || self.kitchen(shutdown));
                    Some(spawned.map_err(|err| self.abort_spawn("kitchen", err))?)
                }
                Termination::Exhaustion => None,
            };

            let mut handles = Vec::with_capacity(self.philosophers.len());
            for name in &self.philosophers {
                let spawned = thread::Builder::new()
                    .name(name.clone())
                    .spawn_scoped(s, move || self.philosopher(name, shutdown));
                handles.push((name, spawned.map_err(|err| self.abort_spawn(name, err))?));
            }

            let tallies: Vec<WorkerTally> = handles
                .into_iter()
                .map(|(name, handle)| {
                    handle.join().unwrap_or_else(|payload| {
                        warn!(philosopher = %name, "philosopher panicked");
                        WorkerTally::panicked(name.as_str(), payload)
                    })
                })
                .collect();

            if let Some(kitchen) = kitchen {
                // Every philosopher has left; nobody needs more sweets.
                self.pool.close();
                if kitchen.join().is_err() {
                    warn!("kitchen thread panicked");
                }
            }
            Ok::<_, SyncError>(tallies)
        })?;

        info!(
            philosophers = tallies.len(),
            eaten = total_consumed(&tallies),
            remaining = self.pool.snapshot().remaining,
            "monitor dining finished"
        );
        Ok(tallies)
    }

    fn philosopher(&self, name: &str, shutdown: &CancelToken) -> WorkerTally {
        let mut tally = WorkerTally::new(name);
        debug!(philosopher = name, "sitting down");
        loop {
            match self.pool.try_consume_with(Wait::cancellable(shutdown)) {
                Ok(left) => {
                    tally.consumed += 1;
                    trace!(philosopher = name, left, "has eaten one sweet");
                    if !self.think_time.is_zero() {
                        thread::sleep(self.think_time);
                    }
                }
                Err(err) => {
                    tally.exit = WorkerExit::from(err);
                    break;
                }
            }
        }
        debug!(philosopher = name, eaten = tally.consumed, exit = ?tally.exit, "leaving the table");
        tally
    }

    fn kitchen(&self, shutdown: &CancelToken) {
        loop {
            let refilled = self
                .pool
                .wait_drained(Wait::cancellable(shutdown))
                .and_then(|()| self.pool.replenish(self.refill_batch));
            match refilled {
                Ok(remaining) => trace!(remaining, "kitchen refilled the bowl"),
                Err(SyncError::Exhausted) | Err(SyncError::Cancelled) => break,
                Err(err) => {
                    warn!(error = %err, "kitchen could not refill");
                    self.pool.close();
                    break;
                }
            }
        }
    }

    fn abort_spawn(&self, worker: &str, err: std::io::Error) -> SyncError {
        // Threads already running would otherwise wait on a bowl nobody fills.
        self.pool.close();
        SyncError::Spawn {
            worker: worker.to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::RecvTimeoutError;

    #[test]
    fn test_five_philosophers_share_one_hundred_sweets() {
        let table = MonitorTable::new(ResourcePool::one_shot(100), 5);
        let tallies = table.run(&CancelToken::new()).unwrap();

        assert_eq!(tallies.len(), 5);
        assert!(tallies.iter().all(WorkerTally::finished));
        assert_eq!(total_consumed(&tallies), 100);
        assert!(table.pool().is_exhausted());
    }

    #[test]
    fn test_kitchen_refills_until_target() {
        let pool = ResourcePool::new(10, Termination::ConsumptionTarget(95));
        let table = MonitorTable::new(pool, 4).refill_batch(7);
        let tallies = table.run(&CancelToken::new()).unwrap();

        assert_eq!(total_consumed(&tallies), 95);
        assert_eq!(table.pool().snapshot().consumed, 95);
    }

    #[test]
    fn test_kitchen_gives_up_on_a_pool_with_no_room() {
        let pool = ResourcePool::new(0, Termination::ConsumptionTarget(3));
        let table = MonitorTable::new(pool, 2);
        let shutdown = CancelToken::new();
        let started = std::time::Instant::now();

        // The token only fires if the run is still going after five seconds.
        let (done_tx, done_rx) = crossbeam::channel::bounded::<()>(0);
        let tallies = thread::scope(|s| {
            s.spawn(|| {
                if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(Duration::from_secs(5)) {
                    shutdown.cancel();
                }
            });
            let tallies = table.run(&shutdown);
            drop(done_tx);
            tallies
        })
        .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(tallies.iter().all(|t| t.exit == WorkerExit::Finished));
        assert_eq!(total_consumed(&tallies), 0);
        assert!(table.pool().is_finished());
    }

    #[test]
    fn test_names_are_kept_in_seating_order() {
        let names = vec!["Socrate".to_string(), "Platon".to_string()];
        let table = MonitorTable::with_names(ResourcePool::one_shot(4), names);
        let tallies = table.run(&CancelToken::new()).unwrap();
        let seated: Vec<_> = tallies.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(seated, ["Socrate", "Platon"]);
    }

    #[test]
    fn test_cancelled_run_reports_cancelled_philosophers() {
        let shutdown = CancelToken::new();
        shutdown.cancel();
        let table = MonitorTable::new(ResourcePool::one_shot(10), 3);
        let tallies = table.run(&shutdown).unwrap();

        assert!(tallies.iter().all(|t| t.exit == WorkerExit::Cancelled));
        assert_eq!(table.pool().snapshot().remaining, 10);
    }
}
