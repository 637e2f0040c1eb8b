// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Concrete end-to-end scenarios exercising more than one primitive at a
//! time, each one a direct program of the corresponding "testable
//! properties" scenario.

use fiber_rt::adapters::use_yield;
use fiber_rt::error::{FiberError, FutureStatus};
use fiber_rt::future::{make_ready_future, Promise};
use fiber_rt::scheduler::{Scheduler, SchedulerConfig};
use fiber_rt::spinlock::Spinlock;
use fiber_rt::sync::{Barrier, Mutex};
use fiber_rt::this_fiber;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Scenario A: three fibers contending for one mutex in staggered start
/// order observe FIFO handoff, not re-contention order.
#[test]
fn mutex_handoff_is_fifo_across_staggered_starts() {
    let scheduler = Scheduler::new(SchedulerConfig {
        worker_threads: 4,
        ..Default::default()
    });
    let mutex = Arc::new(Mutex::new());
    let order = Arc::new(Spinlock::new(Vec::new()));

    let mut handles = Vec::new();
    for (label, delay_ms) in [('A', 0u64), ('B', 10), ('C', 20)] {
        let mutex = mutex.clone();
        let order = order.clone();
        handles.push(scheduler.spawn(async move {
            this_fiber::sleep_for(Duration::from_millis(delay_ms)).await?;
            let _guard = mutex.lock().await?;
            order.lock().push(label);
            this_fiber::sleep_for(Duration::from_millis(10)).await?;
            Ok::<(), FiberError>(())
        }));
    }
    for handle in handles {
        handle.block_on_and_rethrow().unwrap();
    }

    assert_eq!(*order.lock(), vec!['A', 'B', 'C']);
    scheduler.shutdown();
    scheduler.join_workers();
}

/// Scenario B: 1000 producers each push 1..=100 onto a shared queue; the
/// producer that brings a barrier of size 1000 to its threshold closes the
/// queue so the consumer knows to stop.
#[test]
fn barrier_gated_queue_rendezvous_sums_correctly() {
    let scheduler = Scheduler::new(SchedulerConfig {
        worker_threads: 4,
        ..Default::default()
    });

    const PRODUCERS: u64 = 1000;
    let queue = Arc::new(Spinlock::new(VecDeque::<u32>::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(PRODUCERS as usize).unwrap());

    let mut producers = Vec::new();
    for _ in 0..PRODUCERS {
        let queue = queue.clone();
        let closed = closed.clone();
        let barrier = barrier.clone();
        producers.push(scheduler.spawn(async move {
            for v in 1..=100u32 {
                queue.lock().push_back(v);
            }
            let result = barrier.wait().await?;
            if result.is_leader() {
                closed.store(true, Ordering::Release);
            }
            Ok::<(), FiberError>(())
        }));
    }

    let consumer_queue = queue.clone();
    let consumer_closed = closed.clone();
    let consumer = scheduler.spawn(async move {
        let mut sum: u64 = 0;
        loop {
            let popped = consumer_queue.lock().pop_front();
            match popped {
                Some(v) => sum += v as u64,
                None => {
                    if consumer_closed.load(Ordering::Acquire) && consumer_queue.lock().is_empty() {
                        return Ok::<u64, FiberError>(sum);
                    }
                    this_fiber::yield_now(None).await;
                }
            }
        }
    });

    for producer in producers {
        producer.block_on_and_rethrow().unwrap();
    }
    let sum = consumer.block_on_and_rethrow().unwrap();
    assert_eq!(sum, PRODUCERS * (100 * 101 / 2));

    scheduler.shutdown();
    scheduler.join_workers();
}

/// Scenario C: a 3s timer is raced against a 1s canceler; `use_yield`
/// observes the cancellation outcome within [1s, 2s] wall time.
#[test]
fn timer_canceled_before_it_fires_reports_aborted_promptly() {
    let scheduler = Scheduler::new(SchedulerConfig {
        worker_threads: 2,
        ..Default::default()
    });
    let start = Instant::now();
    let handle = scheduler.spawn(async {
        let reactor = fiber_rt::fiber::current().unwrap().scheduler().reactor().clone();
        let timer = reactor.arm_after(Duration::from_secs(3), |_outcome| {});
        let timer_for_canceler = timer;
        let scheduler = fiber_rt::fiber::current().unwrap().scheduler().clone();
        scheduler
            .spawn(async move {
                this_fiber::sleep_for(Duration::from_millis(100)).await?;
                timer_for_canceler.cancel();
                Ok::<(), FiberError>(())
            })
            .detach();

        use_yield(|handler: fiber_rt::adapters::CompletionHandler<&'static str>| {
            let reactor = fiber_rt::fiber::current().unwrap().scheduler().reactor().clone();
            reactor.arm_after(Duration::from_millis(150), move |outcome| {
                let code = match outcome {
                    fiber_rt::reactor::TimerOutcome::Cancelled => "operation aborted",
                    fiber_rt::reactor::TimerOutcome::Fired => "ok",
                };
                handler(Ok(code));
            });
        })
        .await
    });
    let code = handle.block_on_and_rethrow().unwrap();
    assert_eq!(code, "operation aborted");
    assert!(start.elapsed() < Duration::from_secs(2));
    scheduler.shutdown();
    scheduler.join_workers();
}

/// Scenario D: a future fed by a long timer times out under `wait_for`
/// before ever becoming ready.
#[test]
fn wait_for_times_out_before_a_slow_future_resolves() {
    let scheduler = Scheduler::new(SchedulerConfig {
        worker_threads: 2,
        ..Default::default()
    });
    let handle = scheduler.spawn(async {
        let promise: Promise<()> = Promise::new();
        let future = promise.get_future()?;
        let reactor = fiber_rt::fiber::current().unwrap().scheduler().reactor().clone();
        reactor.arm_after(Duration::from_secs(3), move |_| {
            let _ = promise.set_value(());
        });
        future.wait_for(Duration::from_millis(50)).await
    });
    assert_eq!(handle.block_on_and_rethrow().unwrap(), FutureStatus::Timeout);
    scheduler.shutdown();
    scheduler.join_workers();
}

/// Scenario E: a two-link `then` chain transforms the original value.
#[test]
fn then_chain_threads_the_value_through_each_link() {
    let scheduler = Scheduler::new(SchedulerConfig {
        worker_threads: 2,
        ..Default::default()
    });
    let handle = scheduler.spawn(async {
        let future = make_ready_future(100i32);
        future
            .then(|result| result.map(|v| v.to_string()))
            .then(|result| result.map(|s: String| s.parse::<i32>().unwrap()))
            .get()
            .await
    });
    assert_eq!(handle.block_on_and_rethrow().unwrap(), 100);
    scheduler.shutdown();
    scheduler.join_workers();
}

/// Scenario F: interrupting a sleeping fiber raises `Interrupted` unless
/// interruption is disabled for the duration of the sleep.
#[test]
fn interruption_semantics_match_the_three_documented_variants() {
    let scheduler = Scheduler::new(SchedulerConfig {
        worker_threads: 2,
        ..Default::default()
    });

    // (i) unprotected: interrupting mid-sleep raises Interrupted.
    let handle = scheduler.spawn(async {
        this_fiber::sleep_for(Duration::from_secs(1)).await
    });
    handle.interrupt();
    match handle.block_on_and_rethrow() {
        Err(FiberError::Interrupted) => {}
        other => panic!("expected Interrupted, got {other:?}"),
    }

    // (ii) wrapped in disable_interruption: sleep completes normally even
    // though an interrupt was requested.
    let observed = Arc::new(AtomicU64::new(0));
    let observed2 = observed.clone();
    let handle = scheduler.spawn(async move {
        let _guard = this_fiber::disable_interruption();
        this_fiber::sleep_for(Duration::from_millis(20)).await?;
        observed2.store(1, Ordering::Release);
        Ok::<(), FiberError>(())
    });
    handle.interrupt();
    handle.block_on_and_rethrow().unwrap();
    assert_eq!(observed.load(Ordering::Acquire), 1);

    // (iii) disable then restore around only part of the sleep: once the
    // guard is dropped, the pending interrupt is observed at the next
    // checkpoint.
    let handle = scheduler.spawn(async {
        {
            let _guard = this_fiber::disable_interruption();
            this_fiber::sleep_for(Duration::from_millis(10)).await?;
        }
        this_fiber::sleep_for(Duration::from_millis(10)).await
    });
    handle.interrupt();
    match handle.block_on_and_rethrow() {
        Err(FiberError::Interrupted) => {}
        other => panic!("expected Interrupted, got {other:?}"),
    }

    scheduler.shutdown();
    scheduler.join_workers();
}
