//! Multi-threaded scenarios against the scheduler's event handlers.

use multicore_scheduler::config::{Discipline, SchedulerConfig, Timeslice};
use multicore_scheduler::core::{CpuId, ProcessId, ProcessState, ProcessTable};
use multicore_scheduler::queue::ReadyQueue;
use multicore_scheduler::scheduler::{Dispatcher, Scheduler};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Records every outbound call, in order.
#[derive(Default)]
struct Recorder {
    switches: Mutex<Vec<(CpuId, Option<ProcessId>, Timeslice)>>,
    forced: AtomicUsize,
}

impl Dispatcher for Recorder {
    fn context_switch(&self, cpu: CpuId, process: Option<ProcessId>, timeslice: Timeslice) {
        self.switches.lock().unwrap().push((cpu, process, timeslice));
    }

    fn force_preempt(&self, _cpu: CpuId) {
        self.forced.fetch_add(1, Ordering::SeqCst);
    }
}

fn scheduler(
    cpus: usize,
    discipline: Discipline,
    priorities: Vec<u32>,
) -> Arc<Scheduler<Recorder>> {
    let config = SchedulerConfig::new(cpus, discipline).unwrap();
    let table = Arc::new(ProcessTable::from_priorities(priorities));
    Arc::new(Scheduler::new(config, table, Recorder::default()))
}

#[test]
fn concurrent_push_pop_conserves_processes() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 250;
    let q = Arc::new(ReadyQueue::new(Discipline::Priority));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|t| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    q.push(ProcessId(t * PER_PRODUCER + i), (i % 7) as u32);
                }
            })
        })
        .collect();
    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                let mut got = Vec::new();
                for _ in 0..200 {
                    if let Some(id) = q.pop() {
                        got.push(id);
                    }
                    thread::yield_now();
                }
                got
            })
        })
        .collect();

    for p in producers {
        p.join().unwrap();
    }
    let mut seen = HashSet::new();
    for c in consumers {
        for id in c.join().unwrap() {
            assert!(id.0 < PRODUCERS * PER_PRODUCER);
            assert!(seen.insert(id), "{id} popped twice");
        }
    }
    assert_eq!(q.len(), PRODUCERS * PER_PRODUCER - seen.len());
    for id in q.snapshot() {
        assert!(!seen.contains(&id));
    }
}

#[test]
fn idle_blocks_until_wake_up() {
    let s = scheduler(1, Discipline::Fifo, vec![0]);
    let cpu = {
        let s = Arc::clone(&s);
        thread::spawn(move || s.idle(CpuId(0)))
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!cpu.is_finished());
    assert!(s.dispatcher().switches.lock().unwrap().is_empty());

    s.wake_up(ProcessId(0));
    cpu.join().unwrap();
    assert_eq!(s.current(CpuId(0)), Some(ProcessId(0)));
    assert_eq!(s.processes().state(ProcessId(0)), ProcessState::Running);
    s.verify_invariants();
}

#[test]
fn idle_waits_again_when_another_cpu_drains_the_queue() {
    let s = scheduler(2, Discipline::Fifo, vec![0, 0]);
    s.wake_up(ProcessId(0));
    s.schedule(CpuId(0));
    let idle = {
        let s = Arc::clone(&s);
        thread::spawn(move || s.idle(CpuId(1)))
    };
    thread::sleep(Duration::from_millis(20));

    // Each preempt pushes P0, waking cpu1, then pops it again under the table lock.
    for _ in 0..50 {
        s.preempt(CpuId(0));
        thread::yield_now();
    }
    thread::sleep(Duration::from_millis(20));
    assert!(!idle.is_finished());
    assert!(s
        .dispatcher()
        .switches
        .lock()
        .unwrap()
        .iter()
        .all(|&(cpu, process, _)| cpu == CpuId(0) && process == Some(ProcessId(0))));
    assert_eq!(s.current(CpuId(1)), None);

    s.wake_up(ProcessId(1));
    idle.join().unwrap();
    assert_eq!(s.current(CpuId(1)), Some(ProcessId(1)));
    assert_eq!(s.current(CpuId(0)), Some(ProcessId(0)));
    s.verify_invariants();
}

#[test]
fn each_wake_up_releases_one_idle_cpu() {
    let s = scheduler(3, Discipline::Fifo, vec![0, 0, 0]);
    let cpus: Vec<_> = (0..3)
        .map(|i| {
            let s = Arc::clone(&s);
            thread::spawn(move || s.idle(CpuId(i)))
        })
        .collect();
    thread::sleep(Duration::from_millis(20));

    s.wake_up(ProcessId(0));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(cpus.iter().filter(|h| h.is_finished()).count(), 1);

    s.wake_up(ProcessId(1));
    s.wake_up(ProcessId(2));
    for c in cpus {
        c.join().unwrap();
    }
    let running: HashSet<_> = s.assignments().into_iter().flatten().collect();
    assert_eq!(running.len(), 3);
    assert!(s.ready_processes().is_empty());
    s.verify_invariants();
}

#[test]
fn shutdown_releases_idle_cpus() {
    let s = scheduler(2, Discipline::Priority, vec![]);
    let cpus: Vec<_> = (0..2)
        .map(|i| {
            let s = Arc::clone(&s);
            thread::spawn(move || s.idle(CpuId(i)))
        })
        .collect();
    thread::sleep(Duration::from_millis(20));
    s.shutdown();
    for c in cpus {
        c.join().unwrap();
    }
    assert_eq!(s.assignments(), vec![None, None]);
}

#[test]
fn round_robin_every_dispatch_carries_timeslice() {
    let discipline = Discipline::round_robin(3).unwrap();
    let s = scheduler(2, discipline, vec![0, 0, 0]);
    for i in 0..3 {
        s.wake_up(ProcessId(i));
    }
    s.schedule(CpuId(0));
    s.schedule(CpuId(1));
    s.preempt(CpuId(0));
    s.yield_cpu(CpuId(1));
    s.terminate(CpuId(0));
    s.terminate(CpuId(1));

    let switches = s.dispatcher().switches.lock().unwrap().clone();
    assert!(!switches.is_empty());
    for (_, process, slice) in switches {
        match process {
            Some(_) => assert_eq!(slice, discipline.timeslice()),
            None => assert_eq!(slice, Timeslice::Unbounded),
        }
    }
}

#[test]
fn fifo_and_priority_dispatch_unbounded() {
    for discipline in [Discipline::Fifo, Discipline::Priority] {
        let s = scheduler(1, discipline, vec![3, 1]);
        s.wake_up(ProcessId(0));
        s.wake_up(ProcessId(1));
        s.schedule(CpuId(0));
        s.preempt(CpuId(0));
        for (_, _, slice) in s.dispatcher().switches.lock().unwrap().iter() {
            assert_eq!(*slice, Timeslice::Unbounded);
        }
    }
}

#[test]
fn terminated_process_never_returns() {
    let s = scheduler(1, Discipline::round_robin(1).unwrap(), vec![0, 0]);
    s.wake_up(ProcessId(0));
    s.wake_up(ProcessId(1));
    s.schedule(CpuId(0));
    s.terminate(CpuId(0));
    assert_eq!(s.processes().state(ProcessId(0)), ProcessState::Terminated);
    assert_eq!(s.current(CpuId(0)), Some(ProcessId(1)));
    for _ in 0..5 {
        s.preempt(CpuId(0));
        assert_eq!(s.current(CpuId(0)), Some(ProcessId(1)));
        assert!(!s.ready_processes().contains(&ProcessId(0)));
    }
    s.verify_invariants();
}

#[test]
fn priority_preemption_scenario() {
    let s = scheduler(1, Discipline::Priority, vec![10, 2]);
    s.wake_up(ProcessId(0));
    s.schedule(CpuId(0));
    s.wake_up(ProcessId(1));
    assert_eq!(s.dispatcher().forced.load(Ordering::SeqCst), 1);
    assert_eq!(s.current(CpuId(0)), Some(ProcessId(1)));
    assert_eq!(s.processes().state(ProcessId(0)), ProcessState::Ready);
    assert_eq!(s.ready_processes(), vec![ProcessId(0)]);

    let s = scheduler(1, Discipline::Priority, vec![1, 5]);
    s.wake_up(ProcessId(0));
    s.schedule(CpuId(0));
    s.wake_up(ProcessId(1));
    assert_eq!(s.dispatcher().forced.load(Ordering::SeqCst), 0);
    assert_eq!(s.current(CpuId(0)), Some(ProcessId(0)));
    assert_eq!(s.processes().state(ProcessId(1)), ProcessState::Ready);
}

/// Tiny xorshift so each CPU thread makes its own reproducible choices.
fn next(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

fn stress(discipline: Discipline) {
    const CPUS: usize = 4;
    const PROCESSES: usize = 24;
    let s = scheduler(CPUS, discipline, (0..PROCESSES as u32).map(|i| i % 5).collect());
    let terminated = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));

    let waker = {
        let s = Arc::clone(&s);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut admitted = 0;
            while !done.load(Ordering::Acquire) {
                if admitted < PROCESSES {
                    s.wake_up(ProcessId(admitted));
                    admitted += 1;
                }
                for i in 0..admitted {
                    if s.processes().state(ProcessId(i)) == ProcessState::Waiting {
                        s.wake_up(ProcessId(i));
                    }
                }
                thread::yield_now();
            }
        })
    };

    let cpus: Vec<_> = (0..CPUS)
        .map(|i| {
            let s = Arc::clone(&s);
            let terminated = Arc::clone(&terminated);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let cpu = CpuId(i);
                let mut rng = 0x9E37_79B9 + i as u64;
                while !done.load(Ordering::Acquire) {
                    if s.current(cpu).is_none() {
                        s.idle(cpu);
                        continue;
                    }
                    match next(&mut rng) % 10 {
                        0 => {
                            s.terminate(cpu);
                            if terminated.fetch_add(1, Ordering::AcqRel) + 1 == PROCESSES {
                                done.store(true, Ordering::Release);
                                s.shutdown();
                            }
                        }
                        1..=4 => s.yield_cpu(cpu),
                        _ => s.preempt(cpu),
                    }
                }
            })
        })
        .collect();

    for c in cpus {
        c.join().unwrap();
    }
    waker.join().unwrap();

    s.verify_invariants();
    for pcb in s.processes().iter() {
        assert_eq!(pcb.state(), ProcessState::Terminated, "{}", pcb.id);
    }
    assert_eq!(s.assignments(), vec![None; CPUS]);
}

#[test]
fn stress_fifo() {
    stress(Discipline::Fifo);
}

#[test]
fn stress_round_robin() {
    stress(Discipline::round_robin(2).unwrap());
}

#[test]
fn stress_priority() {
    stress(Discipline::Priority);
}
