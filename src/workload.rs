//! Configurable workload generator: per-process scripts of CPU and I/O bursts.

use crate::core::Priority;

/// One phase of a process script, measured in simulator ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Burst {
    /// Needs the CPU for this many ticks.
    Cpu(u32),
    /// Off the CPU, waiting on I/O for this many ticks.
    Io(u32),
}

/// A process as the driver sees it: when it arrives, how urgent it is, what it does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessSpec {
    pub priority: Priority,
    pub arrival_tick: u64,
    /// Alternates Cpu/Io, starting and ending with Cpu.
    pub bursts: Vec<Burst>,
}

impl ProcessSpec {
    pub fn cpu_ticks(&self) -> u64 {
        self.bursts
            .iter()
            .map(|b| match b {
                Burst::Cpu(t) => u64::from(*t),
                Burst::Io(_) => 0,
            })
            .sum()
    }

    pub fn io_requests(&self) -> usize {
        self.bursts
            .iter()
            .filter(|b| matches!(b, Burst::Io(_)))
            .count()
    }
}

/// Workload configuration.
#[derive(Clone, Debug)]
pub struct WorkloadConfig {
    /// Seed for the deterministic generator.
    pub seed: u64,
    /// Number of CPU bursts per process (I/O bursts sit between them).
    pub cpu_bursts: usize,
    /// Inclusive range of CPU burst lengths, in ticks.
    pub cpu_burst_ticks: (u32, u32),
    /// Inclusive range of I/O burst lengths, in ticks.
    pub io_burst_ticks: (u32, u32),
    /// Priorities are drawn from 0..=max_priority.
    pub max_priority: Priority,
    /// Arrivals are spread over 0..arrival_window ticks. 0 = everyone at tick 0.
    pub arrival_window: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            seed: 0x2200,
            cpu_bursts: 3,
            cpu_burst_ticks: (2, 8),
            io_burst_ticks: (3, 10),
            max_priority: 9,
            arrival_window: 20,
        }
    }
}

/// XorShift64, enough for reproducible synthetic scripts.
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed })
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Uniform in `lo..=hi`.
    fn range(&mut self, lo: u64, hi: u64) -> u64 {
        debug_assert!(lo <= hi);
        lo + self.next_u64() % (hi - lo + 1)
    }
}

/// Generates process scripts one at a time.
pub struct WorkloadGenerator {
    config: WorkloadConfig,
    rng: Rng,
}

impl WorkloadGenerator {
    pub fn new(config: WorkloadConfig) -> Self {
        let rng = Rng::new(config.seed);
        Self { config, rng }
    }

    pub fn next_process(&mut self) -> ProcessSpec {
        let cfg = &self.config;
        let cpu_bursts = cfg.cpu_bursts.max(1);
        let (cpu_lo, cpu_hi) = cfg.cpu_burst_ticks;
        let (io_lo, io_hi) = cfg.io_burst_ticks;
        let max_priority = cfg.max_priority;
        let arrival_window = cfg.arrival_window;

        let mut bursts = Vec::with_capacity(cpu_bursts * 2 - 1);
        for i in 0..cpu_bursts {
            if i > 0 {
                bursts.push(Burst::Io(self.ticks(io_lo, io_hi)));
            }
            bursts.push(Burst::Cpu(self.ticks(cpu_lo, cpu_hi)));
        }
        let priority = self.rng.range(0, u64::from(max_priority)) as Priority;
        let arrival_tick = if arrival_window == 0 {
            0
        } else {
            self.rng.range(0, arrival_window - 1)
        };
        ProcessSpec {
            priority,
            arrival_tick,
            bursts,
        }
    }

    /// Burst length in `lo..=hi`, never zero.
    fn ticks(&mut self, lo: u32, hi: u32) -> u32 {
        let lo = lo.max(1);
        let hi = hi.max(lo);
        self.rng.range(u64::from(lo), u64::from(hi)) as u32
    }
}

/// Build a full workload: one script per process.
pub fn build_workload(num_processes: usize, config: WorkloadConfig) -> Vec<ProcessSpec> {
    let mut gen = WorkloadGenerator::new(config);
    (0..num_processes).map(|_| gen.next_process()).collect()
}
