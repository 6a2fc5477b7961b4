use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::fork::Fork;
use crate::cancel::CancelToken;
use crate::monitor::Wait;
use crate::report::{WorkerExit, WorkerTally};

// =============================================================================
// Shared depletion counter
// =============================================================================

/// The sweets every philosopher at a [`DiningTable`](super::DiningTable)
/// eats from.
///
/// Forks only protect neighbours from each other, so the count is kept in an
/// atomic and every decrement is checked.
#[derive(Debug)]
pub struct Bowl {
    initial: u64,
    remaining: AtomicU64,
}

impl Bowl {
    pub fn new(sweets: u64) -> Self {
        Self {
            initial: sweets,
            remaining: AtomicU64::new(sweets),
        }
    }

    pub fn initial(&self) -> u64 {
        self.initial
    }

    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Removes one sweet and returns how many are left, or `None` when the
    /// bowl is already empty.
    pub fn take_one(&self) -> Option<u64> {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
            .map(|before| before - 1)
    }
}

// =============================================================================
// Acquisition strategies
// =============================================================================

/// How a philosopher goes about picking up two forks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// First fork, then second, exactly as seated. Deadlocks when the
    /// seating forms a cycle.
    #[default]
    AsAssigned,
    /// Lower fork id first, whatever the seating says. No cycle can form.
    GlobalOrder,
    /// As seated, but if the second fork is busy put the first one down and
    /// retry after a random pause of up to `max_pause_ms`. Prone to livelock
    /// when the pause is short.
    BackOff { max_pause_ms: u64 },
}

impl Strategy {
    /// The forks in the order they will be picked up.
    pub fn order<'s>(&self, seat: &'s Seat) -> (&'s Fork, &'s Fork) {
        match self {
            Strategy::GlobalOrder if seat.second.id() < seat.first.id() => {
                (&seat.second, &seat.first)
            }
            _ => (&seat.first, &seat.second),
        }
    }

    fn back_off_pause(max_pause_ms: u64) -> Duration {
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_pause_ms))
    }
}

// =============================================================================
// Per-worker state machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle,
    AcquiringFirst,
    AcquiringSecond,
    Consuming,
    Releasing,
    Terminated,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => WorkerState::Idle,
            1 => WorkerState::AcquiringFirst,
            2 => WorkerState::AcquiringSecond,
            3 => WorkerState::Consuming,
            4 => WorkerState::Releasing,
            _ => WorkerState::Terminated,
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, WorkerState::AcquiringFirst | WorkerState::AcquiringSecond)
    }
}

/// A philosopher's place at the table: who sits there and which forks they
/// reach for, in their own order.
#[derive(Debug, Clone)]
pub struct Seat {
    pub id: usize,
    pub name: String,
    pub first: Fork,
    pub second: Fork,
}

const NO_FORK: usize = usize::MAX;

/// Published worker state, read by the table when a run stalls.
#[derive(Debug)]
pub(crate) struct Probe {
    state: AtomicU8,
    wants: AtomicUsize,
}

impl Default for Probe {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Idle as u8),
            wants: AtomicUsize::new(NO_FORK),
        }
    }
}

impl Probe {
    pub(crate) fn set(&self, state: WorkerState, wants: Option<&Fork>) {
        self.wants
            .store(wants.map_or(NO_FORK, Fork::id), Ordering::SeqCst);
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Id of the fork the worker is blocked on, if any.
    pub(crate) fn wants(&self) -> Option<usize> {
        match self.wants.load(Ordering::SeqCst) {
            NO_FORK => None,
            id => Some(id),
        }
    }
}

/// Everything a philosopher shares with the rest of the table for one run.
pub(crate) struct Shift<'a> {
    pub(crate) bowl: &'a Bowl,
    pub(crate) strategy: Strategy,
    pub(crate) opening_hesitation: Duration,
    pub(crate) fault_at: Option<u64>,
    pub(crate) shutdown: &'a CancelToken,
    pub(crate) probe: &'a Probe,
}

/// One philosopher's loop: pick up both forks, eat a sweet, put the forks
/// down second-then-first, until the bowl is empty.
///
/// Counts go straight into `tally` so they survive a panic in the loop.
pub(crate) fn dine(seat: &Seat, shift: &Shift<'_>, tally: &mut WorkerTally) {
    let (first, second) = shift.strategy.order(seat);
    let wait = Wait::cancellable(shift.shutdown);
    let mut opening = true;
    debug!(philosopher = %seat.name, first = first.name(), second = second.name(), "sitting down");

    let exit = loop {
        shift.probe.set(WorkerState::Idle, None);
        if shift.shutdown.is_cancelled() {
            break WorkerExit::Cancelled;
        }
        if shift.bowl.is_empty() {
            break WorkerExit::Finished;
        }

        shift.probe.set(WorkerState::AcquiringFirst, Some(first));
        let held_first = match first.acquire(seat.id, wait) {
            Ok(guard) => guard,
            Err(err) => break WorkerExit::from(err),
        };
        if opening {
            opening = false;
            if !shift.opening_hesitation.is_zero() {
                thread::sleep(shift.opening_hesitation);
            }
        }

        shift.probe.set(WorkerState::AcquiringSecond, Some(second));
        let held_second = match shift.strategy {
            Strategy::BackOff { max_pause_ms } => match second.try_acquire(seat.id) {
                Some(guard) => guard,
                None => {
                    shift.probe.set(WorkerState::Releasing, None);
                    drop(held_first);
                    tally.backoffs += 1;
                    thread::sleep(Strategy::back_off_pause(max_pause_ms));
                    continue;
                }
            },
            _ => match second.acquire(seat.id, wait) {
                Ok(guard) => guard,
                Err(err) => {
                    drop(held_first);
                    break WorkerExit::from(err);
                }
            },
        };

        // The guard check above ran without the forks; check again.
        shift.probe.set(WorkerState::Consuming, None);
        let taken = shift.bowl.take_one();
        if let Some(left) = taken {
            tally.consumed += 1;
            trace!(philosopher = %seat.name, left, "has eaten one sweet");
            if shift.fault_at == Some(left) {
                panic!("{} choked with {left} sweets left", seat.name);
            }
        }

        shift.probe.set(WorkerState::Releasing, None);
        drop(held_second);
        drop(held_first);
        if taken.is_none() {
            break WorkerExit::Finished;
        }
    };

    shift.probe.set(WorkerState::Terminated, None);
    debug!(
        philosopher = %seat.name,
        eaten = tally.consumed,
        backoffs = tally.backoffs,
        exit = ?exit,
        "leaving the table"
    );
    tally.exit = exit;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seat(first: &Fork, second: &Fork) -> Seat {
        Seat {
            id: 0,
            name: "Socrate".into(),
            first: first.clone(),
            second: second.clone(),
        }
    }

    #[test]
    fn test_bowl_never_goes_below_zero() {
        let bowl = Bowl::new(2);
        assert_eq!(bowl.take_one(), Some(1));
        assert_eq!(bowl.take_one(), Some(0));
        assert_eq!(bowl.take_one(), None);
        assert_eq!(bowl.remaining(), 0);
        assert_eq!(bowl.initial(), 2);
    }

    #[test]
    fn test_global_order_picks_lower_id_first() {
        let a = Fork::new(0, "A");
        let c = Fork::new(2, "C");
        let reversed = seat(&c, &a);

        let (first, second) = Strategy::GlobalOrder.order(&reversed);
        assert_eq!((first.name(), second.name()), ("A", "C"));

        let (first, second) = Strategy::AsAssigned.order(&reversed);
        assert_eq!((first.name(), second.name()), ("C", "A"));
    }

    #[test]
    fn test_lone_philosopher_eats_everything() {
        let (a, b) = (Fork::new(0, "A"), Fork::new(1, "B"));
        let bowl = Bowl::new(25);
        let shutdown = CancelToken::new();
        let probe = Probe::default();
        let shift = Shift {
            bowl: &bowl,
            strategy: Strategy::AsAssigned,
            opening_hesitation: Duration::ZERO,
            fault_at: None,
            shutdown: &shutdown,
            probe: &probe,
        };

        let mut tally = WorkerTally::new("Socrate");
        dine(&seat(&a, &b), &shift, &mut tally);
        assert_eq!(tally.consumed, 25);
        assert_eq!(tally.exit, WorkerExit::Finished);
        assert_eq!(probe.state(), WorkerState::Terminated);
        assert_eq!((a.holder(), b.holder()), (None, None));
    }

    #[test]
    fn test_back_off_releases_first_fork_when_second_is_busy() {
        let (a, b) = (Fork::new(0, "A"), Fork::new(1, "B"));
        let bowl = Bowl::new(1);
        let shutdown = CancelToken::new();
        let probe = Probe::default();
        let shift = Shift {
            bowl: &bowl,
            strategy: Strategy::BackOff { max_pause_ms: 5 },
            opening_hesitation: Duration::ZERO,
            fault_at: None,
            shutdown: &shutdown,
            probe: &probe,
        };

        let tally = thread::scope(|s| {
            let blocker = b.acquire(9, Wait::forever()).unwrap();
            let worker = s.spawn(|| {
                let mut tally = WorkerTally::new("Socrate");
                dine(&seat(&a, &b), &shift, &mut tally);
                tally
            });
            thread::sleep(Duration::from_millis(40));
            drop(blocker);
            worker.join().unwrap()
        });
        assert!(tally.backoffs > 0);
        assert_eq!(tally.consumed, 1);
    }

    #[test]
    fn test_second_fork_is_down_before_the_first() {
        let (a, b) = (Fork::new(0, "A"), Fork::new(1, "B"));
        let bowl = Bowl::new(300);
        let shutdown = CancelToken::new();
        let probe = Probe::default();
        let shift = Shift {
            bowl: &bowl,
            strategy: Strategy::AsAssigned,
            opening_hesitation: Duration::ZERO,
            fault_at: None,
            shutdown: &shutdown,
            probe: &probe,
        };
        let diner = seat(&a, &b);

        thread::scope(|s| {
            let worker = s.spawn(|| {
                let mut tally = WorkerTally::new("Socrate");
                dine(&diner, &shift, &mut tally);
                tally
            });
            // Whenever the first fork is free, the second one must be too:
            // holding A keeps the philosopher from reaching for B again.
            for _ in 0..200 {
                let first = a.acquire(9, Wait::forever()).unwrap();
                assert_ne!(b.holder(), Some(0), "B still held after A was put down");
                drop(first);
            }
            assert_eq!(worker.join().unwrap().consumed, 300);
        });
    }

    #[test]
    fn test_probe_reports_wanted_fork() {
        let fork = Fork::new(3, "D");
        let probe = Probe::default();
        assert_eq!(probe.wants(), None);
        probe.set(WorkerState::AcquiringSecond, Some(&fork));
        assert_eq!(probe.state(), WorkerState::AcquiringSecond);
        assert_eq!(probe.wants(), Some(3));
        assert!(probe.state().is_waiting());
    }
}
