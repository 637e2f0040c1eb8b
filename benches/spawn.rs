// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use criterion::{criterion_group, criterion_main, Criterion};
use fiber_rt::scheduler::{Scheduler, SchedulerConfig};
use std::hint::black_box;

async fn work() -> usize {
    let val = 1 + 1;
    fiber_rt::this_fiber::yield_now(None).await;
    black_box(val)
}

fn single_threaded_spawn(c: &mut Criterion) {
    let scheduler = Scheduler::new(SchedulerConfig {
        worker_threads: 1,
        ..Default::default()
    });

    c.bench_function("single_threaded_spawn", |b| {
        b.iter(|| {
            let handle = scheduler.spawn(async { Ok::<_, fiber_rt::FiberError>(work().await) });
            assert_eq!(handle.block_on_and_rethrow().unwrap(), 2);
        })
    });

    scheduler.shutdown();
    scheduler.join_workers();
}

fn single_threaded_spawn10(c: &mut Criterion) {
    let scheduler = Scheduler::new(SchedulerConfig {
        worker_threads: 1,
        ..Default::default()
    });

    c.bench_function("single_threaded_spawn10", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..10)
                .map(|_| scheduler.spawn(async { Ok::<_, fiber_rt::FiberError>(work().await) }))
                .collect();
            for handle in handles {
                assert_eq!(handle.block_on_and_rethrow().unwrap(), 2);
            }
        })
    });

    scheduler.shutdown();
    scheduler.join_workers();
}

fn multi_threaded_spawn10(c: &mut Criterion) {
    let scheduler = Scheduler::new(SchedulerConfig {
        worker_threads: 4,
        ..Default::default()
    });

    c.bench_function("multi_threaded_spawn10", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..10)
                .map(|_| scheduler.spawn(async { Ok::<_, fiber_rt::FiberError>(work().await) }))
                .collect();
            for handle in handles {
                assert_eq!(handle.block_on_and_rethrow().unwrap(), 2);
            }
        })
    });

    scheduler.shutdown();
    scheduler.join_workers();
}

criterion_group!(
    spawn,
    single_threaded_spawn,
    single_threaded_spawn10,
    multi_threaded_spawn10,
);
criterion_main!(spawn);
