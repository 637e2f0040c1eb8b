// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The scheduler: a small pool of OS worker threads draining a global
//! ready queue, plus the [`Reactor`] that arms the timers fibers block on.
//! Grounded on the teacher's `Executor`/`Worker` pair, simplified per
//! `SPEC_FULL.md` §4.2 — no work-stealing beyond the implicit affinity a
//! [`Strand`] already gives a fiber (its continuation always re-enters on
//! whichever worker happens to pop it next, never two at once).

use crate::error::FiberError;
use crate::fiber::{self, JoinHandle};
use crate::loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use crate::park::{Park, ParkingLot, StdPark};
use crate::reactor::Reactor;
use crate::spinlock::Spinlock;
use crate::strand::{RawExecutor, Strand};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Condvar, Mutex as StdMutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

static_assertions::assert_impl_all!(Scheduler: Send, Sync);

/// Tuning knobs for a [`Scheduler`] (spec §4.2).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of OS worker threads draining the ready queue.
    pub worker_threads: usize,
    /// Upper bound on how long a worker parks before re-checking for
    /// shutdown, even with no timer due — the scheduler's heartbeat.
    pub heartbeat: Duration,
    /// Name prefix for spawned worker threads (visible in a debugger or
    /// `top -H`).
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let parallelism = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            worker_threads: parallelism,
            heartbeat: Duration::from_millis(50),
            thread_name_prefix: "fiber-worker".to_string(),
        }
    }
}

/// The runtime that drives fibers to completion.
///
/// A `Scheduler` owns a pool of OS worker threads and a [`Reactor`]. Each
/// worker repeatedly pops a job from the global ready queue (populated by
/// [`Strand::post`]/`dispatch` via the scheduler's [`RawExecutor`] impl),
/// runs it, and — when no job is ready — parks, bounded by the next due
/// timer or the heartbeat, whichever is sooner.
pub struct Scheduler {
    config: SchedulerConfig,
    reactor: Arc<Reactor>,
    ready: Spinlock<VecDeque<Job>>,
    parking_lot: ParkingLot<StdPark>,
    live_fibers: AtomicUsize,
    stopping: AtomicBool,
    idle: (StdMutex<()>, Condvar),
    workers: Spinlock<Vec<thread::JoinHandle<()>>>,
    worker_count: AtomicUsize,
    next_worker_id: AtomicUsize,
}

impl Scheduler {
    /// Creates and immediately starts a scheduler with `config`.
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        let worker_threads = config.worker_threads.max(1);
        fiber::set_worker_hint(worker_threads);
        let scheduler = Arc::new(Self {
            config,
            reactor: Arc::new(Reactor::new()),
            ready: Spinlock::new(VecDeque::new()),
            parking_lot: ParkingLot::new(worker_threads),
            live_fibers: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            idle: (StdMutex::new(()), Condvar::new()),
            workers: Spinlock::new(Vec::with_capacity(worker_threads)),
            worker_count: AtomicUsize::new(worker_threads),
            next_worker_id: AtomicUsize::new(worker_threads),
        });
        scheduler.start(worker_threads);
        scheduler
    }

    fn start(self: &Arc<Self>, worker_threads: usize) {
        let mut workers = self.workers.lock();
        for i in 0..worker_threads {
            let scheduler = self.clone();
            let name = format!("{}-{i}", self.config.thread_name_prefix);
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || worker_loop(scheduler))
                .expect("failed to spawn fiber worker thread");
            workers.push(handle);
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count.load(Ordering::Acquire)
    }

    /// Grows the pool by `n` additional OS worker threads while the
    /// scheduler keeps running, the way the teacher's
    /// `add_worker_thread(nthr)` lets a caller scale a thread pool up
    /// after construction instead of only sizing it up front.
    ///
    /// # Panics
    /// Panics if called after [`Scheduler::shutdown`].
    pub fn add_worker(self: &Arc<Self>, n: usize) {
        assert!(
            !self.stopping.load(Ordering::Acquire),
            "add_worker called on a scheduler that is shutting down"
        );
        let mut workers = self.workers.lock();
        for _ in 0..n {
            let id = self.next_worker_id.fetch_add(1, Ordering::AcqRel);
            let scheduler = self.clone();
            let name = format!("{}-{id}", self.config.thread_name_prefix);
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || worker_loop(scheduler))
                .expect("failed to spawn fiber worker thread");
            workers.push(handle);
        }
        self.worker_count.fetch_add(n, Ordering::AcqRel);
    }

    pub fn live_fiber_count(&self) -> usize {
        self.live_fibers.load(Ordering::Acquire)
    }

    pub fn reactor(&self) -> &Arc<Reactor> {
        &self.reactor
    }

    fn pop_ready(&self) -> Option<Job> {
        self.ready.lock().pop_front()
    }

    pub(crate) fn on_fiber_spawned(&self) {
        self.live_fibers.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn on_fiber_exit(&self) {
        if self.live_fibers.fetch_sub(1, Ordering::AcqRel) == 1 {
            let (lock, cvar) = &self.idle;
            let _guard = lock.lock().unwrap();
            cvar.notify_all();
        }
    }

    /// Blocks the calling OS thread until there are no live fibers. Meant
    /// for tests and embedding code, never called from within a fiber.
    pub fn wait_idle(&self) {
        let (lock, cvar) = &self.idle;
        let mut guard = lock.lock().unwrap();
        while self.live_fibers.load(Ordering::Acquire) != 0 {
            guard = cvar.wait(guard).unwrap();
        }
    }

    /// Signals every worker to exit once the ready queue drains, and wakes
    /// any that are currently parked so they notice promptly.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        self.parking_lot.unpark_all();
    }

    /// Joins every worker OS thread. Call after [`Scheduler::shutdown`];
    /// blocks until all workers have exited.
    pub fn join_workers(&self) {
        let handles: Vec<_> = std::mem::take(&mut self.workers.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Spawns `entry` as a new fiber on a fresh, private strand.
    pub fn spawn<F, T>(self: &Arc<Self>, entry: F) -> JoinHandle<T>
    where
        F: Future<Output = Result<T, FiberError>> + Send + 'static,
        T: Send + 'static,
    {
        fiber::spawn(self.clone(), None, entry)
    }

    /// Spawns `entry` as a new fiber bound to `strand`, so its completions
    /// are totally ordered with respect to other fibers sharing it.
    pub fn spawn_on<F, T>(self: &Arc<Self>, strand: Strand, entry: F) -> JoinHandle<T>
    where
        F: Future<Output = Result<T, FiberError>> + Send + 'static,
        T: Send + 'static,
    {
        fiber::spawn(self.clone(), Some(strand), entry)
    }

    /// Creates a new [`Strand`] whose drain loop runs on this scheduler.
    pub fn new_strand(self: &Arc<Self>) -> Strand {
        Strand::new(self.clone() as Arc<dyn RawExecutor>)
    }
}

impl RawExecutor for Scheduler {
    fn execute(&self, job: Job) {
        self.ready.lock().push_back(job);
        self.parking_lot.unpark_one();
    }
}

fn worker_loop(scheduler: Arc<Scheduler>) {
    let parker = Arc::new(StdPark::for_current());
    loop {
        if let Some(job) = scheduler.pop_ready() {
            job();
            continue;
        }

        let now = Instant::now();
        let next_deadline = scheduler.reactor.poll_timers(now);

        if scheduler.stopping.load(Ordering::Acquire) && scheduler.ready.lock().is_empty() {
            break;
        }

        let park_for = match next_deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(scheduler.config.heartbeat),
            None => scheduler.config.heartbeat,
        };
        scheduler.parking_lot.park_timeout(&parker, park_for);
    }
}

static DEFAULT_SCHEDULER: OnceLock<Arc<Scheduler>> = OnceLock::new();

/// The process-wide scheduler used by [`greenify`] and anywhere else a
/// caller doesn't want to manage its own [`Scheduler`].
pub fn default_scheduler() -> &'static Arc<Scheduler> {
    DEFAULT_SCHEDULER.get_or_init(|| Scheduler::new(SchedulerConfig::default()))
}

/// Bridges a plain OS thread (typically `main`) into the fiber runtime:
/// spawns `entry` as a fiber on the [`default_scheduler`] and blocks the
/// calling thread until it completes, returning (or propagating) its
/// result. This is the fiber-runtime equivalent of Boost.Fiber's implicit
/// "main fiber" — the calling thread becomes, for the duration of the
/// call, the thread that keeps the runtime alive.
pub fn greenify<F, T>(entry: F) -> Result<T, FiberError>
where
    F: Future<Output = Result<T, FiberError>> + Send + 'static,
    T: Send + 'static,
{
    let scheduler = default_scheduler();
    let handle = scheduler.spawn(entry);
    handle.block_on_and_rethrow()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_a_spawned_fiber_to_completion() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 2,
            ..Default::default()
        });
        let handle = scheduler.spawn(async { Ok::<_, FiberError>(40 + 2) });
        assert_eq!(handle.block_on_and_rethrow().unwrap(), 42);
        scheduler.shutdown();
        scheduler.join_workers();
    }

    #[test]
    fn wait_idle_returns_once_all_fibers_stop() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 2,
            ..Default::default()
        });
        for _ in 0..5 {
            scheduler.spawn(async { Ok::<(), FiberError>(()) }).detach();
        }
        scheduler.wait_idle();
        assert_eq!(scheduler.live_fiber_count(), 0);
        scheduler.shutdown();
        scheduler.join_workers();
    }

    #[test]
    fn greenify_bridges_the_calling_thread() {
        let out = greenify(async { Ok::<_, FiberError>("hello") });
        assert_eq!(out.unwrap(), "hello");
    }

    #[test]
    fn add_worker_grows_the_pool_and_takes_on_work() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 1,
            ..Default::default()
        });
        assert_eq!(scheduler.worker_count(), 1);
        scheduler.add_worker(2);
        assert_eq!(scheduler.worker_count(), 3);

        let handles: Vec<_> = (0..6)
            .map(|_| scheduler.spawn(async { Ok::<_, FiberError>(()) }))
            .collect();
        for handle in handles {
            handle.block_on_and_rethrow().unwrap();
        }
        scheduler.shutdown();
        scheduler.join_workers();
    }
}
