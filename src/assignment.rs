//! Current-assignment table: which process each CPU is running.
//!
//! Every access goes through [`AssignmentTable::lock`], so multi-slot reads
//! (the Priority scan) and the read-decide-write sequences built on them see
//! one consistent table.

use crate::core::{CpuId, Priority, ProcessId};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
pub struct AssignmentTable {
    slots: Mutex<Vec<Option<ProcessId>>>,
}

/// Exclusive view of the table, held for a whole read-decide-write sequence.
pub struct Assignments<'a> {
    slots: MutexGuard<'a, Vec<Option<ProcessId>>>,
}

impl AssignmentTable {
    /// One idle slot per CPU.
    pub fn new(cpu_count: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; cpu_count]),
        }
    }

    pub fn lock(&self) -> Assignments<'_> {
        Assignments {
            slots: self.slots.lock().expect("assignment table mutex poisoned"),
        }
    }

    /// Copy of every slot, CPU 0 first.
    pub fn snapshot(&self) -> Vec<Option<ProcessId>> {
        self.lock().slots.clone()
    }
}

impl Assignments<'_> {
    pub fn get(&self, cpu: CpuId) -> Option<ProcessId> {
        match self.slots.get(cpu.0) {
            Some(slot) => *slot,
            None => no_slot(cpu, self.slots.len()),
        }
    }

    pub fn set(&mut self, cpu: CpuId, process: Option<ProcessId>) {
        let len = self.slots.len();
        match self.slots.get_mut(cpu.0) {
            Some(slot) => *slot = process,
            None => no_slot(cpu, len),
        }
    }

    /// The CPU running the numerically largest priority, skipping idle CPUs.
    /// The first such CPU wins a tie.
    pub fn worst_running<F>(&self, priority_of: F) -> Option<(CpuId, ProcessId, Priority)>
    where
        F: Fn(ProcessId) -> Priority,
    {
        let mut worst: Option<(CpuId, ProcessId, Priority)> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            let Some(id) = *slot else {
                continue;
            };
            let priority = priority_of(id);
            if worst.map_or(true, |(_, _, w)| priority > w) {
                worst = Some((CpuId(i), id, priority));
            }
        }
        worst
    }

    pub fn cpu_count(&self) -> usize {
        self.slots.len()
    }
}

fn no_slot(cpu: CpuId, len: usize) -> ! {
    panic!("{cpu} has no assignment slot ({len} CPUs)")
}
