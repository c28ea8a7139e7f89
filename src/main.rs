//! Multithreaded OS simulator: runs a synthetic workload under FIFO,
//! Round-Robin or Priority scheduling.

use anyhow::{Context, Result};
use clap::Parser;
use multicore_scheduler::config::{Discipline, SchedulerConfig};
use multicore_scheduler::simulator::Simulator;
use multicore_scheduler::workload::{build_workload, WorkloadConfig};
use std::time::Duration;

/// Multithreaded OS Simulator.
///
/// Default: FIFO scheduler. -r: Round-Robin scheduler. -p: Priority scheduler.
#[derive(Parser, Debug)]
#[command(name = "os-sim", version)]
struct Cli {
    /// Number of simulated CPUs.
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    cpus: u32,

    /// Round-Robin scheduling with the given timeslice, in ticks.
    #[arg(
        short = 'r',
        value_name = "TIME SLICE",
        conflicts_with = "priority",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    round_robin: Option<u32>,

    /// Preemptive Priority scheduling.
    #[arg(short = 'p')]
    priority: bool,

    /// Number of processes in the synthetic workload.
    #[arg(long, default_value_t = 8)]
    processes: usize,

    /// Workload generator seed.
    #[arg(long, default_value_t = WorkloadConfig::default().seed)]
    seed: u64,

    /// Wall-clock length of one simulated tick, in milliseconds.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    tick_ms: u64,
}

impl Cli {
    fn discipline(&self) -> Result<Discipline> {
        Ok(match (self.round_robin, self.priority) {
            (Some(timeslice), _) => Discipline::round_robin(timeslice)?,
            (None, true) => Discipline::Priority,
            (None, false) => Discipline::Fifo,
        })
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = SchedulerConfig::new(cli.cpus as usize, cli.discipline()?)
        .context("invalid scheduler configuration")?;
    let workload = build_workload(
        cli.processes,
        WorkloadConfig {
            seed: cli.seed,
            ..WorkloadConfig::default()
        },
    );
    let expected_cpu_ticks: u64 = workload.iter().map(|p| p.cpu_ticks()).sum();
    let expected_io: usize = workload.iter().map(|p| p.io_requests()).sum();

    println!("=== Multithreaded OS Simulator ===\n");
    println!("  CPUs:       {}", config.cpu_count());
    println!("  Scheduler:  {}", config.discipline());
    println!("  Processes:  {}", workload.len());

    let metrics = Simulator::new(config, workload, Duration::from_millis(cli.tick_ms))
        .run()
        .context("simulation failed")?;

    println!("\n--- Run statistics ---");
    println!("  Total ticks:          {}", metrics.total_ticks);
    println!("  Context switches:     {}", metrics.context_switches);
    println!("  Idle dispatches:      {}", metrics.idle_dispatches);
    println!("  Timeslice expiries:   {}", metrics.slice_expiries);
    println!("  Forced preemptions:   {}", metrics.forced_preemptions);
    println!(
        "  I/O requests:         {} (workload issues {})",
        metrics.io_yields, expected_io
    );
    println!("  Terminated:           {}", metrics.terminations);
    println!(
        "  CPU ticks executed:   {} (workload needs {})",
        metrics.busy_ticks(),
        expected_cpu_ticks
    );
    println!("  CPU utilisation:      ~{:.2}%", metrics.utilization_percent());

    let mut per_cpu: Vec<_> = metrics.per_cpu.iter().collect();
    per_cpu.sort_by_key(|(cpu, _)| **cpu);
    for (cpu, per) in per_cpu {
        println!(
            "    {cpu}: busy {:>5}  idle {:>5}  switches {:>4}",
            per.busy_ticks, per.idle_ticks, per.context_switches
        );
    }
    Ok(())
}
