//! Scheduler core and event handlers.
//!
//! The driver raises one of five events per scheduling point: `idle`,
//! `preempt`, `yield_cpu` and `terminate` on the thread simulating the CPU,
//! and `wake_up` from any thread. Each handler updates the process state,
//! feeds the ready queue, and tells the driver what the CPU runs next through
//! the [`Dispatcher`].
//!
//! Lock order: assignment table, then ready queue, then whatever the
//! dispatcher locks internally. It is never reversed. The table lock is held
//! across pop, assign and dispatch, so the driver always learns about an
//! assignment in the same order the table records it.

use crate::assignment::{AssignmentTable, Assignments};
use crate::config::{SchedulerConfig, Timeslice};
use crate::core::{CpuId, ProcessId, ProcessState, ProcessTable};
use crate::policy;
use crate::queue::ReadyQueue;
use log::debug;
use std::sync::Arc;

/// Outbound interface to the driver.
///
/// Called with scheduler locks held: implementations must not call back
/// into the [`Scheduler`].
pub trait Dispatcher: Send + Sync {
    /// Hand `cpu` its next process (`None` = idle) and run-length limit.
    fn context_switch(&self, cpu: CpuId, process: Option<ProcessId>, timeslice: Timeslice);

    /// Interrupt `cpu` immediately; its current process is being evicted.
    fn force_preempt(&self, cpu: CpuId);
}

impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    fn context_switch(&self, cpu: CpuId, process: Option<ProcessId>, timeslice: Timeslice) {
        (**self).context_switch(cpu, process, timeslice)
    }

    fn force_preempt(&self, cpu: CpuId) {
        (**self).force_preempt(cpu)
    }
}

/// Multi-CPU scheduler. Share it between CPU threads behind an `Arc`.
pub struct Scheduler<D> {
    config: SchedulerConfig,
    processes: Arc<ProcessTable>,
    ready: ReadyQueue,
    current: AssignmentTable,
    dispatcher: D,
}

impl<D: Dispatcher> Scheduler<D> {
    pub fn new(config: SchedulerConfig, processes: Arc<ProcessTable>, dispatcher: D) -> Self {
        Self {
            ready: ReadyQueue::new(config.discipline()),
            current: AssignmentTable::new(config.cpu_count()),
            config,
            processes,
            dispatcher,
        }
    }

    /// Picks the next process for `cpu`, or leaves it idle.
    pub fn schedule(&self, cpu: CpuId) {
        let mut slots = self.current.lock();
        self.schedule_locked(&mut slots, cpu);
    }

    /// The only path (besides forced preemption) that makes a process RUNNING.
    fn schedule_locked(&self, slots: &mut Assignments<'_>, cpu: CpuId) -> Option<ProcessId> {
        let next = self.ready.pop();
        match next {
            Some(id) => {
                self.processes.get(id).set_state(ProcessState::Running);
                slots.set(cpu, Some(id));
                let timeslice = self.config.timeslice();
                debug!("{cpu}: dispatch {id} ({timeslice:?})");
                self.dispatcher.context_switch(cpu, Some(id), timeslice);
            }
            None => {
                slots.set(cpu, None);
                debug!("{cpu}: dispatch idle");
                self.dispatcher.context_switch(cpu, None, Timeslice::Unbounded);
            }
        }
        next
    }

    /// Idle loop for `cpu`: blocks until a process is ready, then schedules it.
    ///
    /// Only returns once `cpu` has been given a process, or after [`shutdown`](Self::shutdown).
    pub fn idle(&self, cpu: CpuId) {
        loop {
            if !self.ready.wait_until_nonempty() {
                debug!("{cpu}: idle released by shutdown");
                return;
            }
            let mut slots = self.current.lock();
            // Pops only happen under the table lock, so a non-empty queue seen
            // here cannot be drained before schedule_locked runs.
            if self.ready.is_empty() {
                continue;
            }
            if let Some(running) = slots.get(cpu) {
                panic!("{cpu} called idle while running {running}");
            }
            self.schedule_locked(&mut slots, cpu);
            return;
        }
    }

    /// Timeslice expiry: the running process goes back to the ready queue.
    pub fn preempt(&self, cpu: CpuId) {
        let mut slots = self.current.lock();
        let id = self.running_on(&slots, cpu, "preempt");
        self.make_ready(id);
        debug!("{cpu}: {id} preempted");
        self.schedule_locked(&mut slots, cpu);
    }

    /// The running process starts I/O; it returns only through `wake_up`.
    pub fn yield_cpu(&self, cpu: CpuId) {
        let mut slots = self.current.lock();
        let id = self.running_on(&slots, cpu, "yield");
        self.processes.get(id).set_state(ProcessState::Waiting);
        debug!("{cpu}: {id} yielded for I/O");
        self.schedule_locked(&mut slots, cpu);
    }

    /// The running process has finished for good.
    pub fn terminate(&self, cpu: CpuId) {
        let mut slots = self.current.lock();
        let id = self.running_on(&slots, cpu, "terminate");
        self.processes.get(id).set_state(ProcessState::Terminated);
        debug!("{cpu}: {id} terminated");
        self.schedule_locked(&mut slots, cpu);
    }

    /// A NEW or WAITING process becomes runnable.
    ///
    /// Under Priority, when every CPU is busy, the CPU running the worst
    /// (numerically largest) priority is taken over if that priority is
    /// strictly worse than the waking process's. If any CPU is idle no
    /// preemption happens: the idle CPU picks the process up from the queue.
    pub fn wake_up(&self, id: ProcessId) {
        let pcb = self.processes.get(id);
        let state = pcb.state();
        assert!(
            matches!(state, ProcessState::New | ProcessState::Waiting),
            "wake_up of {id} in state {state}"
        );

        if !self.config.discipline().is_priority() {
            self.make_ready(id);
            debug!("{id} woke up");
            return;
        }

        let mut slots = self.current.lock();
        let any_idle = (0..slots.cpu_count()).any(|i| slots.get(CpuId(i)).is_none());
        let victim = if any_idle {
            None
        } else {
            slots
                .worst_running(|p| self.processes.priority(p))
                .filter(|&(_, _, worst)| policy::should_preempt(worst, pcb.priority))
        };

        match victim {
            Some((cpu, evicted, worst)) => {
                debug!(
                    "{id} (priority {}) preempts {evicted} (priority {worst}) on {cpu}",
                    pcb.priority
                );
                self.dispatcher.force_preempt(cpu);
                self.make_ready(evicted);
                pcb.set_state(ProcessState::Running);
                slots.set(cpu, Some(id));
                self.dispatcher.context_switch(cpu, Some(id), Timeslice::Unbounded);
            }
            None => {
                self.make_ready(id);
                debug!("{id} woke up (priority {})", pcb.priority);
            }
        }
    }

    /// Closes the ready queue, releasing every CPU blocked in [`idle`](Self::idle).
    pub fn shutdown(&self) {
        debug!("scheduler shutdown");
        self.ready.close();
    }

    fn make_ready(&self, id: ProcessId) {
        let pcb = self.processes.get(id);
        pcb.set_state(ProcessState::Ready);
        self.ready.push(id, pcb.priority);
    }

    fn running_on(&self, slots: &Assignments<'_>, cpu: CpuId, event: &str) -> ProcessId {
        match slots.get(cpu) {
            Some(id) => id,
            None => panic!("{event} raised on idle {cpu}"),
        }
    }

    /// Process currently assigned to `cpu`.
    pub fn current(&self, cpu: CpuId) -> Option<ProcessId> {
        self.current.lock().get(cpu)
    }

    /// Every CPU's assignment, CPU 0 first.
    pub fn assignments(&self) -> Vec<Option<ProcessId>> {
        self.current.snapshot()
    }

    /// Ready processes, head first.
    pub fn ready_processes(&self) -> Vec<ProcessId> {
        self.ready.snapshot()
    }

    /// Asserts the queue/table/state invariants. Only meaningful at a
    /// quiescent point, when no handler is in flight.
    ///
    /// # Panics
    ///
    /// Panics describing the first violation found.
    pub fn verify_invariants(&self) {
        let slots = self.current.lock();
        let ready = self.ready.snapshot();
        for pcb in self.processes.iter() {
            let queued = ready.iter().filter(|&&id| id == pcb.id).count();
            let running_on = (0..slots.cpu_count())
                .filter(|&i| slots.get(CpuId(i)) == Some(pcb.id))
                .count();
            let state = pcb.state();
            assert_eq!(
                queued,
                usize::from(state == ProcessState::Ready),
                "{} is {state} but queued {queued} time(s)",
                pcb.id
            );
            assert_eq!(
                running_on,
                usize::from(state == ProcessState::Running),
                "{} is {state} but assigned to {running_on} CPU(s)",
                pcb.id
            );
        }
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }
}
