//! Multi-CPU scheduler core: ready queue, CPU assignment table, FIFO / Round-Robin /
//! Priority disciplines, plus a threaded driver that exercises it.

pub mod assignment;
pub mod config;
pub mod core;
pub mod metrics;
pub mod policy;
pub mod queue;
pub mod scheduler;
pub mod simulator;
pub mod workload;
