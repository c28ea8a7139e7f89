//! Discipline policy: where a process enters the ready queue, and when a waking
//! process may evict a running one.

use crate::config::Discipline;
use crate::core::Priority;

/// Index at which a process of `priority` is inserted into a queue whose entries
/// currently have the priorities `queued` (head first).
///
/// FIFO and Round-Robin append. Priority keeps the queue sorted ascending and
/// places the newcomer after every entry of equal priority.
pub fn insert_position<I>(discipline: Discipline, queued: I, priority: Priority) -> usize
where
    I: IntoIterator<Item = Priority>,
    I::IntoIter: ExactSizeIterator,
{
    let queued = queued.into_iter();
    match discipline {
        Discipline::Fifo | Discipline::RoundRobin { .. } => queued.len(),
        Discipline::Priority => {
            let len = queued.len();
            queued
                .enumerate()
                .find(|&(_, p)| p > priority)
                .map_or(len, |(i, _)| i)
        }
    }
}

/// Whether a waking process should force out the worst running one.
/// Strictly worse only: an exact tie never preempts.
pub fn should_preempt(worst_running: Priority, waking: Priority) -> bool {
    worst_running > waking
}
