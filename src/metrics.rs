//! Metrics collection: ticks, context switches, preemptions, CPU utilisation.

use crate::core::CpuId;
use std::collections::HashMap;

/// Aggregate and per-CPU statistics for one simulation run.
///
/// `total_ticks` comes from the event thread's clock while busy ticks are
/// counted by each CPU thread, so idle ticks and utilisation derived from
/// the two are approximate.
#[derive(Clone, Default, Debug)]
pub struct Metrics {
    /// Simulated ticks until the last process terminated.
    pub total_ticks: u64,
    /// Dispatches that handed a CPU a process.
    pub context_switches: u64,
    /// Dispatches that left a CPU idle.
    pub idle_dispatches: u64,
    /// Round-Robin timeslice expiries.
    pub slice_expiries: u64,
    /// Priority wake-ups that evicted a running process.
    pub forced_preemptions: u64,
    /// I/O requests issued by running processes.
    pub io_yields: u64,
    pub terminations: u64,
    pub per_cpu: HashMap<CpuId, PerCpuMetrics>,
}

#[derive(Clone, Default, Debug)]
pub struct PerCpuMetrics {
    pub busy_ticks: u64,
    pub idle_ticks: u64,
    pub context_switches: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatch(&mut self, cpu: CpuId, idle: bool) {
        let per = self.per_cpu.entry(cpu).or_default();
        if idle {
            self.idle_dispatches += 1;
        } else {
            self.context_switches += 1;
            per.context_switches += 1;
        }
    }

    pub fn record_busy_tick(&mut self, cpu: CpuId) {
        self.per_cpu.entry(cpu).or_default().busy_ticks += 1;
    }

    /// Fills in each CPU's idle ticks against a run of `total_ticks`.
    pub fn finish(&mut self, total_ticks: u64) {
        self.total_ticks = total_ticks;
        for per in self.per_cpu.values_mut() {
            per.idle_ticks = total_ticks.saturating_sub(per.busy_ticks);
        }
    }

    pub fn busy_ticks(&self) -> u64 {
        self.per_cpu.values().map(|p| p.busy_ticks).sum()
    }

    /// Fraction of CPU-ticks spent running a process (0.0 when nothing ran).
    /// Capped at 1.0, since the two clocks can drift.
    pub fn utilization(&self) -> f64 {
        let total = self.total_ticks * self.per_cpu.len() as u64;
        if total == 0 {
            return 0.0;
        }
        (self.busy_ticks() as f64 / total as f64).min(1.0)
    }

    /// Utilisation in percent.
    pub fn utilization_percent(&self) -> f64 {
        self.utilization() * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_empty_run() {
        let m = Metrics::new();
        assert_eq!(m.utilization(), 0.0);
        assert_eq!(m.busy_ticks(), 0);
    }

    #[test]
    fn metrics_dispatch_counts() {
        let mut m = Metrics::new();
        m.record_dispatch(CpuId(0), false);
        m.record_dispatch(CpuId(0), true);
        m.record_dispatch(CpuId(1), false);
        assert_eq!(m.context_switches, 2);
        assert_eq!(m.idle_dispatches, 1);
        assert_eq!(m.per_cpu[&CpuId(0)].context_switches, 1);
    }

    #[test]
    fn metrics_utilization() {
        let mut m = Metrics::new();
        for _ in 0..3 {
            m.record_busy_tick(CpuId(0));
        }
        m.record_busy_tick(CpuId(1));
        m.finish(4);
        assert_eq!(m.per_cpu[&CpuId(0)].idle_ticks, 1);
        assert_eq!(m.per_cpu[&CpuId(1)].idle_ticks, 3);
        assert!((m.utilization_percent() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn utilization_caps_when_clocks_drift() {
        let mut m = Metrics::new();
        for _ in 0..5 {
            m.record_busy_tick(CpuId(0));
        }
        m.finish(4);
        assert_eq!(m.per_cpu[&CpuId(0)].idle_ticks, 0);
        assert_eq!(m.utilization(), 1.0);
    }
}
