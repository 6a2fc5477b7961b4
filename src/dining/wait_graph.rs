//! Circular-wait detection for a stalled table.
//!
//! Each waiting philosopher has at most one outgoing edge: to whoever holds
//! the fork they are blocked on. A deadlock is a cycle in that graph.

use super::worker::WorkerState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerView {
    pub id: usize,
    pub name: String,
    pub state: WorkerState,
    /// Fork id the worker is blocked on.
    pub wants: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkView {
    pub id: usize,
    pub holder: Option<usize>,
}

/// Returns the names of the philosophers in a circular wait, starting from
/// the lowest seat id, or `None` if nobody is waiting in a cycle.
pub fn find_cycle(workers: &[WorkerView], forks: &[ForkView]) -> Option<Vec<String>> {
    let waits_for = |worker: &WorkerView| -> Option<usize> {
        if !worker.state.is_waiting() {
            return None;
        }
        let wanted = worker.wants?;
        let holder = forks.iter().find(|f| f.id == wanted)?.holder?;
        (holder != worker.id).then_some(holder)
    };
    let position = |id: usize| workers.iter().position(|w| w.id == id);

    for start in 0..workers.len() {
        let mut path: Vec<usize> = Vec::new();
        let mut current = start;
        loop {
            if let Some(at) = path.iter().position(|&p| p == current) {
                let mut cycle = path.split_off(at);
                let lowest = (0..cycle.len())
                    .min_by_key(|&i| workers[cycle[i]].id)
                    .unwrap_or(0);
                cycle.rotate_left(lowest);
                return Some(cycle.into_iter().map(|i| workers[i].name.clone()).collect());
            }
            path.push(current);
            match waits_for(&workers[current]).and_then(position) {
                Some(next) => current = next,
                None => break,
            }
        }
    }
    None
}
