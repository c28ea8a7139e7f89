//! Core process model: CPU and process identifiers, process states, and the PCB table.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Scheduling priority. Lower value = higher priority (0 is the most urgent).
pub type Priority = u32;

/// Identifies a simulated CPU (0..N).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuId(pub usize);

/// Stable handle of a process: an index into the driver-owned [`ProcessTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub usize);

/// Lifecycle state of a process.
///
/// NEW -> READY -> RUNNING -> {READY, WAITING, TERMINATED}; WAITING -> READY.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessState {
    New = 0,
    Ready = 1,
    Running = 2,
    Waiting = 3,
    Terminated = 4,
}

impl ProcessState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ProcessState::New,
            1 => ProcessState::Ready,
            2 => ProcessState::Running,
            3 => ProcessState::Waiting,
            4 => ProcessState::Terminated,
            other => panic!("corrupt process state byte {other}"),
        }
    }
}

/// Process control block.
///
/// Priority is fixed for the lifetime of the process. State is mutated by the
/// scheduler from whichever thread raised the event, so it is stored atomically;
/// the scheduler's locks provide the ordering between transitions.
#[derive(Debug)]
pub struct Pcb {
    pub id: ProcessId,
    pub priority: Priority,
    state: AtomicU8,
}

impl Pcb {
    pub fn new(id: ProcessId, priority: Priority) -> Self {
        Self {
            id,
            priority,
            state: AtomicU8::new(ProcessState::New as u8),
        }
    }

    pub fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ProcessState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Driver-owned table of PCBs. The scheduler only holds [`ProcessId`] handles into it.
#[derive(Debug, Default)]
pub struct ProcessTable {
    pcbs: Vec<Pcb>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table with one NEW process per priority, ids assigned in order.
    pub fn from_priorities<I: IntoIterator<Item = Priority>>(priorities: I) -> Self {
        let mut table = Self::new();
        for priority in priorities {
            table.add(priority);
        }
        table
    }

    /// Registers a new process and returns its handle.
    pub fn add(&mut self, priority: Priority) -> ProcessId {
        let id = ProcessId(self.pcbs.len());
        self.pcbs.push(Pcb::new(id, priority));
        id
    }

    /// Looks up a PCB. An unknown handle is a programming error.
    pub fn get(&self, id: ProcessId) -> &Pcb {
        self.pcbs
            .get(id.0)
            .unwrap_or_else(|| panic!("unknown process handle {id}"))
    }

    pub fn priority(&self, id: ProcessId) -> Priority {
        self.get(id).priority
    }

    pub fn state(&self, id: ProcessId) -> ProcessState {
        self.get(id).state()
    }

    pub fn len(&self) -> usize {
        self.pcbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcbs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pcb> {
        self.pcbs.iter()
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid{}", self.0)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::New => write!(f, "NEW"),
            ProcessState::Ready => write!(f, "READY"),
            ProcessState::Running => write!(f, "RUNNING"),
            ProcessState::Waiting => write!(f, "WAITING"),
            ProcessState::Terminated => write!(f, "TERMINATED"),
        }
    }
}
