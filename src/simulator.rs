//! Threaded driver: one thread per simulated CPU plus an event thread for
//! arrivals and I/O completions, feeding the scheduler's event handlers.

use crate::config::{Discipline, SchedulerConfig, Timeslice};
use crate::core::{CpuId, ProcessId, ProcessState, ProcessTable};
use crate::metrics::Metrics;
use crate::scheduler::{Dispatcher, Scheduler};
use crate::workload::{Burst, ProcessSpec};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread;
use std::time::Duration;

#[derive(Debug)]
pub enum SimulationError {
    /// A CPU or event thread panicked; the payload message if it had one.
    ThreadPanicked { thread: String, message: String },
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::ThreadPanicked { thread, message } => {
                write!(f, "simulation thread {thread} panicked: {message}")
            }
        }
    }
}

impl Error for SimulationError {}

/// What a CPU was last told to run.
#[derive(Clone, Copy, Debug, Default)]
struct CpuSlot {
    running: Option<ProcessId>,
    /// Ticks left in the current Round-Robin slice.
    slice_left: Option<u32>,
}

/// The driver's side of [`Dispatcher`]: per-CPU dispatch slots and counters.
#[derive(Debug)]
struct SimCpus {
    slots: Vec<Mutex<CpuSlot>>,
    metrics: Mutex<Metrics>,
}

impl SimCpus {
    fn new(cpu_count: usize) -> Self {
        let mut metrics = Metrics::new();
        for i in 0..cpu_count {
            metrics.per_cpu.entry(CpuId(i)).or_default();
        }
        Self {
            slots: (0..cpu_count).map(|_| Mutex::new(CpuSlot::default())).collect(),
            metrics: Mutex::new(metrics),
        }
    }

    fn slot(&self, cpu: CpuId) -> MutexGuard<'_, CpuSlot> {
        self.slots[cpu.0].lock().expect("cpu slot mutex poisoned")
    }

    fn metrics(&self) -> MutexGuard<'_, Metrics> {
        self.metrics.lock().expect("metrics mutex poisoned")
    }
}

impl Dispatcher for SimCpus {
    fn context_switch(&self, cpu: CpuId, process: Option<ProcessId>, timeslice: Timeslice) {
        *self.slot(cpu) = CpuSlot {
            running: process,
            slice_left: timeslice.ticks(),
        };
        self.metrics().record_dispatch(cpu, process.is_none());
    }

    fn force_preempt(&self, cpu: CpuId) {
        let mut slot = self.slot(cpu);
        debug!("{cpu}: interrupted, evicting {:?}", slot.running);
        slot.running = None;
        slot.slice_left = None;
        self.metrics().forced_preemptions += 1;
    }
}

/// Outcome of one CPU tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Idle,
    Run,
    SliceExpired,
    Io(ProcessId, u32),
    Finished,
}

struct IoRequest {
    process: ProcessId,
    ticks: u32,
}

/// State shared by every simulation thread for one run.
struct Shared {
    scheduler: Scheduler<Arc<SimCpus>>,
    cpus: Arc<SimCpus>,
    /// Remaining bursts per process, front = current.
    scripts: Vec<Mutex<VecDeque<Burst>>>,
    /// CPU ticks take it shared; wake-ups take it exclusively, so a handler
    /// raised by a CPU always concerns the process that CPU just ran.
    gate: RwLock<()>,
    clock: AtomicU64,
    remaining: AtomicUsize,
    done: AtomicBool,
    tick: Duration,
}

impl Shared {
    /// Advances `cpu`'s process by one tick and reports what happens next.
    fn step(&self, cpu: CpuId) -> Step {
        let mut slot = self.cpus.slot(cpu);
        let Some(id) = slot.running else {
            return Step::Idle;
        };
        let mut script = self.scripts[id.0].lock().expect("script mutex poisoned");
        let left = match script.front_mut() {
            Some(Burst::Cpu(left)) => {
                *left = left.saturating_sub(1);
                *left
            }
            other => panic!("{cpu} running {id} outside a CPU burst: {other:?}"),
        };
        self.cpus.metrics().record_busy_tick(cpu);

        if left == 0 {
            script.pop_front();
            return match script.pop_front() {
                Some(Burst::Io(ticks)) => Step::Io(id, ticks),
                None => Step::Finished,
                Some(Burst::Cpu(_)) => panic!("{id} has back-to-back CPU bursts"),
            };
        }
        match slot.slice_left.as_mut() {
            Some(slice) => {
                *slice -= 1;
                if *slice == 0 {
                    Step::SliceExpired
                } else {
                    Step::Run
                }
            }
            None => Step::Run,
        }
    }

    fn finish(&self) {
        info!("all processes terminated at tick {}", self.clock.load(Ordering::Acquire));
        self.done.store(true, Ordering::Release);
        self.scheduler.shutdown();
    }

    fn cpu_loop(&self, cpu: CpuId, io_tx: Sender<IoRequest>) {
        let _stop = StopOnPanic(self);
        while !self.done.load(Ordering::Acquire) {
            let gate = self.gate.read().expect("gate poisoned");
            match self.step(cpu) {
                Step::Idle => {
                    drop(gate);
                    self.scheduler.idle(cpu);
                    continue;
                }
                Step::Run => {}
                Step::SliceExpired => {
                    self.cpus.metrics().slice_expiries += 1;
                    self.scheduler.preempt(cpu);
                }
                Step::Io(process, ticks) => {
                    self.cpus.metrics().io_yields += 1;
                    self.scheduler.yield_cpu(cpu);
                    // The receiver only goes away once the run is over.
                    let _ = io_tx.send(IoRequest { process, ticks });
                }
                Step::Finished => {
                    self.cpus.metrics().terminations += 1;
                    self.scheduler.terminate(cpu);
                    if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        self.finish();
                    }
                }
            }
            drop(gate);
            thread::sleep(self.tick);
        }
        debug!("{cpu}: stopped");
    }

    fn event_loop(&self, arrivals: Vec<(u64, ProcessId)>, io_rx: Receiver<IoRequest>) {
        let _stop = StopOnPanic(self);
        let ticker = crossbeam_channel::tick(self.tick);
        let mut arrivals = arrivals.into_iter().peekable();
        let mut pending: Vec<(ProcessId, u32)> = Vec::new();
        while !self.done.load(Ordering::Acquire) {
            if ticker.recv().is_err() {
                break;
            }
            pending.extend(io_rx.try_iter().map(|req| (req.process, req.ticks)));
            let now = self.clock.fetch_add(1, Ordering::AcqRel);

            let mut woken = Vec::new();
            while let Some(&(_, id)) = arrivals.peek().filter(|(at, _)| *at <= now) {
                arrivals.next();
                debug!("tick {now}: {id} arrives");
                woken.push(id);
            }
            pending.retain_mut(|(id, left)| {
                *left = left.saturating_sub(1);
                if *left == 0 {
                    woken.push(*id);
                    false
                } else {
                    true
                }
            });
            if !woken.is_empty() {
                let _gate = self.gate.write().expect("gate poisoned");
                for id in woken {
                    self.scheduler.wake_up(id);
                }
            }
        }
        debug!("event thread stopped");
    }
}

/// Stops the whole run if the owning thread unwinds, so no CPU stays blocked in idle.
struct StopOnPanic<'a>(&'a Shared);

impl Drop for StopOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.done.store(true, Ordering::Release);
            self.0.scheduler.shutdown();
        }
    }
}

/// Runs a workload on a fresh scheduler with real CPU threads.
pub struct Simulator {
    config: SchedulerConfig,
    specs: Vec<ProcessSpec>,
    tick: Duration,
}

impl Simulator {
    pub fn new(config: SchedulerConfig, specs: Vec<ProcessSpec>, tick: Duration) -> Self {
        Self {
            config,
            specs,
            tick,
        }
    }

    /// Runs until every process has terminated.
    pub fn run(self) -> Result<Metrics, SimulationError> {
        let cpu_count = self.config.cpu_count();
        let processes = Arc::new(ProcessTable::from_priorities(
            self.specs.iter().map(|s| s.priority),
        ));
        let cpus = Arc::new(SimCpus::new(cpu_count));
        let scheduler = Scheduler::new(self.config, Arc::clone(&processes), Arc::clone(&cpus));

        let mut arrivals: Vec<(u64, ProcessId)> = self
            .specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.arrival_tick, ProcessId(i)))
            .collect();
        arrivals.sort();

        let shared = Shared {
            scheduler,
            cpus: Arc::clone(&cpus),
            scripts: self
                .specs
                .into_iter()
                .map(|s| Mutex::new(s.bursts.into_iter().collect()))
                .collect(),
            gate: RwLock::new(()),
            clock: AtomicU64::new(0),
            remaining: AtomicUsize::new(processes.len()),
            done: AtomicBool::new(false),
            tick: self.tick,
        };

        info!(
            "simulating {} processes on {cpu_count} CPUs, {}",
            processes.len(),
            self.config.discipline()
        );
        if processes.is_empty() {
            shared.finish();
        }

        let (io_tx, io_rx) = crossbeam_channel::unbounded();
        thread::scope(|scope| {
            let shared = &shared;
            let events = thread::Builder::new()
                .name("events".into())
                .spawn_scoped(scope, move || shared.event_loop(arrivals, io_rx))
                .expect("failed to spawn event thread");
            let workers: Vec<_> = (0..cpu_count)
                .map(|i| {
                    let io_tx = io_tx.clone();
                    thread::Builder::new()
                        .name(format!("cpu{i}"))
                        .spawn_scoped(scope, move || shared.cpu_loop(CpuId(i), io_tx))
                        .expect("failed to spawn cpu thread")
                })
                .collect();
            drop(io_tx);

            let mut first_error = None;
            for (i, handle) in workers.into_iter().enumerate() {
                if let Err(payload) = handle.join() {
                    first_error.get_or_insert(panicked(format!("cpu{i}"), payload));
                }
            }
            if let Err(payload) = events.join() {
                first_error.get_or_insert(panicked("events".into(), payload));
            }
            first_error.map_or(Ok(()), Err)
        })?;

        shared.scheduler.verify_invariants();
        debug_assert!(processes
            .iter()
            .all(|p| p.state() == ProcessState::Terminated));

        let mut metrics = cpus.metrics().clone();
        metrics.finish(shared.clock.load(Ordering::Acquire));
        if matches!(self.config.discipline(), Discipline::RoundRobin { .. })
            && metrics.slice_expiries == 0
        {
            warn!("no timeslice expired; every CPU burst fit in one slice");
        }
        Ok(metrics)
    }
}

fn panicked(thread: String, payload: Box<dyn std::any::Any + Send>) -> SimulationError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    SimulationError::ThreadPanicked { thread, message }
}
