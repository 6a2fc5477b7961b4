use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError};
use tracing::{info, warn};

use super::fork::{Fairness, Fork};
use super::wait_graph::{find_cycle, ForkView, WorkerView};
use super::worker::{dine, Bowl, Probe, Seat, Shift, Strategy, WorkerState};
use crate::cancel::CancelToken;
use crate::error::{ConfigError, SyncError};
use crate::report::{panic_message, total_consumed, WorkerExit, WorkerTally};

// =============================================================================
// Run results
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every philosopher left the table before the run's patience ran out.
    Finished,
    /// The run was stopped. `cycle` names the philosophers caught in a
    /// circular wait at that moment, if there was one.
    Stalled { cycle: Option<Vec<String>> },
}

#[derive(Debug, Clone)]
pub struct DiningReport {
    pub outcome: Outcome,
    /// One tally per seat, in seating order.
    pub tallies: Vec<WorkerTally>,
    pub initial: u64,
    pub remaining: u64,
    pub elapsed: Duration,
}

impl DiningReport {
    pub fn total_consumed(&self) -> u64 {
        total_consumed(&self.tallies)
    }

    pub fn is_deadlocked(&self) -> bool {
        matches!(self.outcome, Outcome::Stalled { cycle: Some(_) })
    }

    pub fn finished(&self) -> bool {
        self.outcome == Outcome::Finished
    }
}

// =============================================================================
// Table construction
// =============================================================================

pub struct TableBuilder {
    sweets: u64,
    forks: Vec<String>,
    seats: Vec<(String, usize, usize)>,
    strategy: Strategy,
    fairness: Fairness,
    opening_hesitation: Duration,
    fault_at: Option<u64>,
}

impl TableBuilder {
    /// Adds a fork; forks are ordered by insertion.
    pub fn fork(mut self, name: impl Into<String>) -> Self {
        self.forks.push(name.into());
        self
    }

    /// Seats a philosopher who reaches for fork `first`, then `second`
    /// (indices into the forks added so far).
    pub fn seat(mut self, name: impl Into<String>, first: usize, second: usize) -> Self {
        self.seats.push((name.into(), first, second));
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn fairness(mut self, fairness: Fairness) -> Self {
        self.fairness = fairness;
        self
    }

    /// Pause after the first fork on the first round only. Long enough, it
    /// makes a cyclic seating deadlock every time.
    pub fn opening_hesitation(mut self, pause: Duration) -> Self {
        self.opening_hesitation = pause;
        self
    }

    /// The philosopher who leaves exactly `remaining` sweets in the bowl
    /// panics while still holding both forks.
    pub fn fault_at(mut self, remaining: u64) -> Self {
        self.fault_at = Some(remaining);
        self
    }

    pub fn build(self) -> Result<DiningTable, ConfigError> {
        if self.seats.is_empty() {
            return Err(ConfigError::invalid("seats", "a table needs at least one philosopher"));
        }
        let forks: Vec<Fork> = self
            .forks
            .into_iter()
            .enumerate()
            .map(|(id, name)| Fork::with_fairness(id, name, self.fairness))
            .collect();

        let mut seats = Vec::with_capacity(self.seats.len());
        for (id, (name, first, second)) in self.seats.into_iter().enumerate() {
            let lookup = |index: usize| {
                forks.get(index).cloned().ok_or_else(|| ConfigError::UnknownFork {
                    seat: name.clone(),
                    fork: format!("#{index}"),
                })
            };
            let (first, second) = (lookup(first)?, lookup(second)?);
            if first.id() == second.id() {
                return Err(ConfigError::invalid(
                    format!("seats.{name}"),
                    "a philosopher needs two different forks",
                ));
            }
            seats.push(Seat {
                id,
                name,
                first,
                second,
            });
        }

        Ok(DiningTable {
            forks,
            seats,
            sweets: self.sweets,
            strategy: self.strategy,
            opening_hesitation: self.opening_hesitation,
            fault_at: self.fault_at,
        })
    }
}

// =============================================================================
// The table
// =============================================================================

pub struct DiningTable {
    forks: Vec<Fork>,
    seats: Vec<Seat>,
    sweets: u64,
    strategy: Strategy,
    opening_hesitation: Duration,
    fault_at: Option<u64>,
}

impl DiningTable {
    pub fn builder(sweets: u64) -> TableBuilder {
        TableBuilder {
            sweets,
            forks: Vec::new(),
            seats: Vec::new(),
            strategy: Strategy::default(),
            fairness: Fairness::default(),
            opening_hesitation: Duration::ZERO,
            fault_at: None,
        }
    }

    /// Socrate (A, B), Platon (B, C), Kant (C, A): every fork is someone's
    /// first and someone else's second, so reaching as seated can deadlock.
    pub fn cyclic(sweets: u64) -> TableBuilder {
        Self::three_forks(sweets).seat("Socrate", 0, 1).seat("Platon", 1, 2).seat("Kant", 2, 0)
    }

    /// Same philosophers, but Kant reaches for A before C, so every seat
    /// follows the fork order and no cycle can form.
    pub fn ordered(sweets: u64) -> TableBuilder {
        Self::three_forks(sweets).seat("Socrate", 0, 1).seat("Platon", 1, 2).seat("Kant", 0, 2)
    }

    fn three_forks(sweets: u64) -> TableBuilder {
        Self::builder(sweets).fork("A").fork("B").fork("C")
    }

    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    pub fn forks(&self) -> &[Fork] {
        &self.forks
    }

    /// Runs every philosopher on its own thread until the bowl is empty or
    /// `patience` runs out.
    ///
    /// On timeout the table records any circular wait, cancels all pending
    /// fork acquisitions and joins every thread before reporting, so no
    /// thread outlives the call.
    pub fn run(&self, patience: Duration) -> DiningReport {
        let started = Instant::now();
        let deadline = started.checked_add(patience);
        let bowl = Bowl::new(self.sweets);
        let shutdown = CancelToken::new();
        let probes: Vec<Probe> = self.seats.iter().map(|_| Probe::default()).collect();
        let mut tallies: Vec<WorkerTally> =
            self.seats.iter().map(|seat| WorkerTally::new(seat.name.as_str())).collect();
        let mut outcome = Outcome::Finished;

        thread::scope(|s| {
            let (done_tx, done_rx) = channel::unbounded::<(usize, WorkerTally)>();
            let mut running = 0;

            for (seat, probe) in self.seats.iter().zip(&probes) {
                let shift = Shift {
                    bowl: &bowl,
                    strategy: self.strategy,
                    opening_hesitation: self.opening_hesitation,
                    fault_at: self.fault_at,
                    shutdown: &shutdown,
                    probe,
                };
                let done = done_tx.clone();
                let spawned = thread::Builder::new().name(seat.name.clone()).spawn_scoped(s, move || {
                    let mut tally = WorkerTally::new(seat.name.as_str());
                    let dined = panic::catch_unwind(AssertUnwindSafe(|| dine(seat, &shift, &mut tally)));
                    if let Err(payload) = dined {
                        probe.set(WorkerState::Terminated, None);
                        warn!(philosopher = %seat.name, "philosopher panicked, forks were put down");
                        tally.exit = WorkerExit::Panicked(panic_message(payload.as_ref()));
                    }
                    let _ = done.send((seat.id, tally));
                });
                match spawned {
                    Ok(_) => running += 1,
                    Err(err) => {
                        shutdown.cancel();
                        tallies[seat.id].exit = WorkerExit::Failed(SyncError::Spawn {
                            worker: seat.name.clone(),
                            reason: err.to_string(),
                        });
                        break;
                    }
                }
            }
            drop(done_tx);

            while running > 0 {
                let next = match deadline {
                    Some(deadline) => done_rx.recv_deadline(deadline),
                    None => done_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                };
                match next {
                    Ok((id, tally)) => {
                        tallies[id] = tally;
                        running -= 1;
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        let cycle = self.circular_wait(&probes);
                        warn!(?cycle, "table stalled, cancelling every philosopher");
                        outcome = Outcome::Stalled { cycle };
                        shutdown.cancel();
                        for (id, tally) in done_rx.iter() {
                            tallies[id] = tally;
                        }
                        break;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        let report = DiningReport {
            outcome,
            tallies,
            initial: bowl.initial(),
            remaining: bowl.remaining(),
            elapsed: started.elapsed(),
        };
        debug_assert_eq!(report.total_consumed() + report.remaining, report.initial);
        info!(
            outcome = ?report.outcome,
            eaten = report.total_consumed(),
            remaining = report.remaining,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "dining finished"
        );
        report
    }

    fn circular_wait(&self, probes: &[Probe]) -> Option<Vec<String>> {
        let workers: Vec<WorkerView> = self
            .seats
            .iter()
            .zip(probes)
            .map(|(seat, probe)| WorkerView {
                id: seat.id,
                name: seat.name.clone(),
                state: probe.state(),
                wants: probe.wants(),
            })
            .collect();
        let forks: Vec<ForkView> = self
            .forks
            .iter()
            .map(|fork| ForkView {
                id: fork.id(),
                holder: fork.holder(),
            })
            .collect();
        find_cycle(&workers, &forks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_rejects_same_fork_twice() {
        let err = DiningTable::builder(10).fork("A").seat("Socrate", 0, 0).build();
        assert!(matches!(err, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_builder_rejects_unknown_fork() {
        let err = DiningTable::builder(10).fork("A").fork("B").seat("Kant", 0, 5).build();
        assert!(matches!(err, Err(ConfigError::UnknownFork { .. })));
    }

    #[test]
    fn test_ordered_table_eats_every_sweet() {
        let table = DiningTable::ordered(5_000).build().unwrap();
        let report = table.run(Duration::from_secs(10));

        assert!(report.finished());
        assert_eq!(report.total_consumed(), 5_000);
        assert_eq!(report.remaining, 0);
        assert!(report.tallies.iter().all(WorkerTally::finished));
        assert!(table.forks().iter().all(|f| f.holder().is_none()));
    }

    #[test]
    fn test_global_order_rescues_cyclic_seating() {
        let table = DiningTable::cyclic(2_000)
            .strategy(Strategy::GlobalOrder)
            .opening_hesitation(Duration::from_millis(50))
            .build()
            .unwrap();
        let report = table.run(Duration::from_secs(10));

        assert!(report.finished());
        assert_eq!(report.total_consumed(), 2_000);
    }

    #[test]
    fn test_panicking_philosopher_puts_forks_down() {
        let table = DiningTable::ordered(500).fault_at(10).build().unwrap();
        let report = table.run(Duration::from_secs(10));

        assert!(report.finished());
        assert_eq!(report.remaining, 0);
        assert_eq!(report.total_consumed(), 500);
        let panicked = report
            .tallies
            .iter()
            .filter(|t| matches!(t.exit, WorkerExit::Panicked(_)))
            .count();
        assert_eq!(panicked, 1);
    }
}
