//! Cycle bookkeeping of `PartitionScheduler` driven through deferred and
//! inline pools.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tessel_core::{MapId, PartitionId, SchedulerConfig, TaskFn, WorkerPool};
use tessel_engine::{PartitionScheduler, SchedulerPhase, ThreadPool};
use tessel_test_utils::{init_test_tracing, DeferredPool, InlinePool, ManualClock};

const MAP: MapId = MapId(571);

fn config(workers: usize) -> SchedulerConfig {
    SchedulerConfig {
        worker_threads: Some(workers),
        ..SchedulerConfig::default()
    }
}

fn counting_job(ran: &Arc<AtomicU32>) -> impl FnMut(PartitionId) -> TaskFn + '_ {
    move |_| {
        let ran = Arc::clone(ran);
        Box::new(move || {
            ran.fetch_add(1, Ordering::SeqCst);
        })
    }
}

fn scheduler(pool: Arc<dyn WorkerPool>) -> (PartitionScheduler, Arc<ManualClock>) {
    init_test_tracing();
    let clock = Arc::new(ManualClock::new(0));
    (PartitionScheduler::new(MAP, pool, clock.clone()), clock)
}

#[test]
fn stale_completions_do_not_finish_the_next_cycle() {
    let pool = Arc::new(DeferredPool::new(4));
    let (mut s, _) = scheduler(pool.clone());
    let cfg = config(4);
    let ran = Arc::new(AtomicU32::new(0));

    assert!(!s.poll(50, &cfg, || 4, counting_job(&ran)));
    assert_eq!(pool.pending(), 4);
    let stale = pool.take_all();
    let first_generation = s.generation();

    assert!(s.cancel_cycle());
    assert!(!s.cancel_cycle());
    assert_eq!(s.phase(), SchedulerPhase::Idle);

    assert!(!s.poll(50, &cfg, || 4, counting_job(&ran)));
    assert!(s.generation() > first_generation);
    for task in stale {
        assert!(task.run());
    }
    assert_eq!(ran.load(Ordering::SeqCst), 4);
    assert!(!s.poll(50, &cfg, || 4, counting_job(&ran)));
    assert_eq!(s.phase(), SchedulerPhase::Draining);

    assert_eq!(pool.run_all(), 4);
    assert!(s.poll(50, &cfg, || 4, counting_job(&ran)));
    assert_eq!(s.cycles_completed(), 1);
    assert_eq!(s.phase(), SchedulerPhase::Idle);
}

#[test]
fn completion_is_reported_exactly_once() {
    let pool = Arc::new(DeferredPool::new(2));
    let (mut s, _) = scheduler(pool.clone());
    let cfg = config(2);
    let ran = Arc::new(AtomicU32::new(0));

    let mut trues = 0;
    let mut polls = 0;
    while trues == 0 {
        polls += 1;
        if s.poll(50, &cfg, || 5, counting_job(&ran)) {
            trues += 1;
        }
        assert!(pool.pending() <= 2, "in-flight limit exceeded");
        pool.run_next();
        assert!(polls < 100);
    }
    assert_eq!(ran.load(Ordering::SeqCst), 5);

    let m = s.last_cycle().cloned().unwrap();
    assert_eq!(m.partitions, 5);
    assert_eq!(m.max_in_flight, 2);
    assert_eq!(m.polls, polls);

    // The next poll opens a fresh cycle rather than repeating `true`.
    assert!(!s.poll(50, &cfg, || 5, counting_job(&ran)));
    assert_eq!(s.phase(), SchedulerPhase::Scheduling);
}

#[test]
fn in_flight_limit_follows_tick_delta_and_contention_cap() {
    let cases = [(20, 8, 6), (60, 8, 5), (150, 8, 4), (250, 8, 3), (20, 2, 2)];
    for (delta, cap, expected) in cases {
        let pool = Arc::new(DeferredPool::new(16));
        let (mut s, _) = scheduler(pool.clone());
        let cfg = SchedulerConfig {
            contention_cap: cap,
            ..config(16)
        };
        let ran = Arc::new(AtomicU32::new(0));
        assert!(!s.poll(delta, &cfg, || 12, counting_job(&ran)));
        assert_eq!(pool.pending() as u32, expected, "delta {delta} cap {cap}");
    }
}

#[test]
fn backlogged_pool_halves_the_limit() {
    let pool = Arc::new(DeferredPool::new(2));
    let (mut s, _) = scheduler(pool.clone());
    let cfg = config(2);
    let ran = Arc::new(AtomicU32::new(0));

    // Another map left five tasks queued on the shared pool.
    let (mut other, _) = scheduler(pool.clone());
    assert!(!other.poll(20, &config(8), || 5, counting_job(&ran)));
    assert_eq!(pool.pending(), 5);

    assert!(!s.poll(20, &cfg, || 4, counting_job(&ran)));
    assert_eq!(pool.pending(), 6);
}

#[test]
fn rejected_tasks_run_inline() {
    let pool = Arc::new(DeferredPool::new(2));
    pool.close();
    let (mut s, _) = scheduler(pool);
    let ran = Arc::new(AtomicU32::new(0));
    assert!(s.poll(50, &config(2), || 6, counting_job(&ran)));
    assert_eq!(ran.load(Ordering::SeqCst), 6);
}

#[test]
fn serial_mode_runs_every_partition_in_one_call() {
    let pool = Arc::new(DeferredPool::new(2));
    let (mut s, _) = scheduler(pool.clone());
    let cfg = SchedulerConfig {
        parallel: false,
        ..config(2)
    };
    let order = Arc::new(Mutex::new(Vec::new()));
    let job = |p: PartitionId| -> TaskFn {
        let order = Arc::clone(&order);
        Box::new(move || order.lock().unwrap().push(p))
    };
    assert!(s.poll(50, &cfg, || 3, job));
    assert_eq!(pool.pending(), 0);
    assert_eq!(
        *order.lock().unwrap(),
        vec![PartitionId(1), PartitionId(2), PartitionId(3)]
    );
}

#[test]
fn zero_partitions_still_runs_partition_one() {
    let (mut s, _) = scheduler(Arc::new(InlinePool::new(2)));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let job = |p: PartitionId| -> TaskFn {
        let seen = Arc::clone(&seen);
        Box::new(move || seen.lock().unwrap().push(p))
    };
    assert!(s.poll(50, &config(2), || 0, job));
    assert_eq!(*seen.lock().unwrap(), vec![PartitionId(1)]);
}

#[test]
fn panicking_task_still_completes_the_cycle() {
    let (mut s, _) = scheduler(Arc::new(InlinePool::new(2)));
    let job = |p: PartitionId| -> TaskFn {
        Box::new(move || {
            if p == PartitionId(2) {
                panic!("gameplay bug");
            }
        })
    };
    assert!(s.poll(50, &config(2), || 3, job));
}

#[test]
fn slow_cycle_is_flagged_once_per_interval() {
    let pool = Arc::new(DeferredPool::new(1));
    let (mut s, clock) = scheduler(pool.clone());
    let cfg = config(1);
    let ran = Arc::new(AtomicU32::new(0));

    let mut run_cycle = |advance: u64| {
        assert!(!s.poll(50, &cfg, || 1, counting_job(&ran)));
        clock.advance(advance);
        pool.run_all();
        assert!(s.poll(50, &cfg, || 1, counting_job(&ran)));
        s.last_cycle().cloned().unwrap()
    };

    let slow = run_cycle(45);
    assert!(slow.logged_slow);
    assert_eq!(slow.cycle_ms, 45);

    // Inside the log interval: slow again but not logged.
    assert!(!run_cycle(60).logged_slow);
    assert!(!run_cycle(10).logged_slow);

    clock.advance(5_000);
    assert!(run_cycle(41).logged_slow);
}

#[test]
fn thread_pool_cycle_completes() {
    let pool = Arc::new(ThreadPool::new(3).unwrap());
    let (mut s, _) = scheduler(pool.clone());
    let cfg = config(3);
    let ran = Arc::new(AtomicU32::new(0));
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    while !s.poll(50, &cfg, || 9, counting_job(&ran)) {
        assert!(std::time::Instant::now() < deadline, "cycle never completed");
        std::thread::yield_now();
    }
    assert_eq!(ran.load(Ordering::SeqCst), 9);
    let m = s.last_cycle().unwrap();
    assert_eq!(m.max_in_flight, 3);
    assert!(m.run_total_us >= m.run_max_us);
    pool.shutdown();
}
