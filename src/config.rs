//! Startup configuration: CPU count and scheduling discipline, fixed for the whole run.

use std::error::Error;
use std::fmt;
use std::num::NonZeroU32;

/// Maximum run length handed to a CPU with each dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeslice {
    /// Run until the process yields, terminates or is force-preempted.
    Unbounded,
    /// Run for at most this many ticks.
    Ticks(NonZeroU32),
}

impl Timeslice {
    pub fn ticks(self) -> Option<u32> {
        match self {
            Timeslice::Unbounded => None,
            Timeslice::Ticks(t) => Some(t.get()),
        }
    }
}

/// Scheduling discipline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Discipline {
    /// Run in arrival order until the process gives up the CPU.
    #[default]
    Fifo,
    /// FIFO order with a fixed timeslice.
    RoundRobin { timeslice: NonZeroU32 },
    /// Lowest priority value first; waking processes may preempt worse running ones.
    Priority,
}

impl Discipline {
    /// Builds a Round-Robin discipline, rejecting a zero timeslice.
    pub fn round_robin(timeslice: u32) -> Result<Self, ConfigError> {
        NonZeroU32::new(timeslice)
            .map(|timeslice| Discipline::RoundRobin { timeslice })
            .ok_or(ConfigError::ZeroTimeslice)
    }

    /// Timeslice passed with every non-idle dispatch.
    pub fn timeslice(self) -> Timeslice {
        match self {
            Discipline::RoundRobin { timeslice } => Timeslice::Ticks(timeslice),
            Discipline::Fifo | Discipline::Priority => Timeslice::Unbounded,
        }
    }

    pub fn is_priority(self) -> bool {
        matches!(self, Discipline::Priority)
    }
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discipline::Fifo => write!(f, "FIFO"),
            Discipline::RoundRobin { timeslice } => {
                write!(f, "Round-Robin (timeslice {timeslice})")
            }
            Discipline::Priority => write!(f, "Priority"),
        }
    }
}

/// Rejected startup configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    ZeroCpus,
    ZeroTimeslice,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroCpus => write!(f, "CPU count must be a positive integer"),
            ConfigError::ZeroTimeslice => {
                write!(f, "Round-Robin timeslice must be a positive integer")
            }
        }
    }
}

impl Error for ConfigError {}

/// Immutable scheduler configuration, built once and shared by reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    cpu_count: usize,
    discipline: Discipline,
}

impl SchedulerConfig {
    pub fn new(cpu_count: usize, discipline: Discipline) -> Result<Self, ConfigError> {
        if cpu_count == 0 {
            return Err(ConfigError::ZeroCpus);
        }
        Ok(Self {
            cpu_count,
            discipline,
        })
    }

    pub fn cpu_count(&self) -> usize {
        self.cpu_count
    }

    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    pub fn timeslice(&self) -> Timeslice {
        self.discipline.timeslice()
    }
}
