//! Ready queue: discipline-ordered processes waiting for a CPU.
//!
//! One mutex guards the ordered entries and the closed flag; the not-empty
//! condition variable is always waited on and signalled under that same mutex,
//! so an emptiness check and the subsequent wait cannot miss a push.

use crate::config::Discipline;
use crate::core::{Priority, ProcessId};
use crate::policy;
use log::trace;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Copy, Debug)]
struct Entry {
    id: ProcessId,
    priority: Priority,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<Entry>,
    /// Set once at shutdown; releases every idle waiter for good.
    closed: bool,
}

/// Unbounded, thread-safe ready queue.
#[derive(Debug)]
pub struct ReadyQueue {
    discipline: Discipline,
    state: Mutex<QueueState>,
    not_empty: Condvar,
}

impl ReadyQueue {
    pub fn new(discipline: Discipline) -> Self {
        Self {
            discipline,
            state: Mutex::new(QueueState::default()),
            not_empty: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().expect("ready queue mutex poisoned")
    }

    /// Inserts `id` at its discipline position and wakes one idle waiter.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already queued.
    pub fn push(&self, id: ProcessId, priority: Priority) {
        let mut st = self.lock();
        assert!(
            st.entries.iter().all(|e| e.id != id),
            "{id} pushed onto the ready queue twice"
        );
        let pos = policy::insert_position(
            self.discipline,
            st.entries.iter().map(|e| e.priority),
            priority,
        );
        st.entries.insert(pos, Entry { id, priority });
        trace!("ready queue: push {id} (priority {priority}) at {pos}, len {}", st.entries.len());
        self.not_empty.notify_one();
    }

    /// Detaches the head, if any. Never blocks beyond the lock.
    pub fn pop(&self) -> Option<ProcessId> {
        let mut st = self.lock();
        let entry = st.entries.pop_front()?;
        trace!("ready queue: pop {}, len {}", entry.id, st.entries.len());
        Some(entry.id)
    }

    /// Blocks until the queue holds at least one process.
    ///
    /// Returns `false` instead if the queue has been closed. Spurious wakeups
    /// are absorbed by re-checking under the lock. The lock is released on
    /// return, so another CPU may still win the race for the head.
    pub fn wait_until_nonempty(&self) -> bool {
        let mut st = self.lock();
        while st.entries.is_empty() && !st.closed {
            st = self.not_empty.wait(st).expect("ready queue condvar poisoned");
        }
        !st.closed
    }

    /// Permanently releases all current and future waiters.
    ///
    /// Tolerates a poisoned lock: this also runs while a panicking thread
    /// tears the simulation down.
    pub fn close(&self) {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        st.closed = true;
        self.not_empty.notify_all();
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Queued handles, head first.
    pub fn snapshot(&self) -> Vec<ProcessId> {
        self.lock().entries.iter().map(|e| e.id).collect()
    }
}
