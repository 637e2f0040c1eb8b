// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The async front-end (spec §4.6, §6): ways to get a [`crate::future::Future`]
//! back from work that isn't a hand-written fiber body — a one-off
//! closure (`spawn_async`), a fixed pool of worker fibers sharing a queue
//! (`Executor`), a single dedicated fiber repeatedly applying one function
//! (`AsyncFunction`), or a pool of real OS threads for calls that
//! genuinely must block (`ForeignThreadPool`).
//!
//! `Executor`/`AsyncFunction`'s internal queues use the same
//! spinlock-protected `VecDeque` + [`crate::sync::Mutex`]/[`crate::sync::CondVar`]
//! gate pattern the teacher's `Worker` uses around its local run queue —
//! the gate gives worker fibers a place to suspend (not busy-spin) when
//! the queue runs dry, without ever blocking the OS thread underneath
//! them.

use crate::error::FiberError;
use crate::future::{Future as FiberFuture, PackagedTask, Promise};
use crate::loom::sync::atomic::{AtomicBool, Ordering};
use crate::scheduler::Scheduler;
use crate::spinlock::Spinlock;
use crate::sync::{CondVar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

/// Spawns `f` as a detached fiber and returns a future for its result —
/// the Rust expression of the distilled spec's `async(f, args...)`.
pub fn spawn_async<F, T>(scheduler: &Arc<Scheduler>, f: F) -> FiberFuture<T>
where
    F: FnOnce() -> Result<T, FiberError> + Send + 'static,
    T: Send + 'static,
{
    let task = PackagedTask::new(f);
    let future = task.get_future().expect("freshly created packaged_task");
    scheduler
        .spawn(async move {
            task.invoke();
            Ok::<(), FiberError>(())
        })
        .detach();
    future
}

/// A fixed pool of worker fibers draining one shared task queue.
pub struct Executor<T> {
    gate: Mutex,
    not_empty: CondVar,
    queue: Spinlock<VecDeque<PackagedTask<T>>>,
    closed: AtomicBool,
}

impl<T: Send + 'static> Executor<T> {
    /// Starts `worker_count` worker fibers on `scheduler`.
    pub fn new(scheduler: &Arc<Scheduler>, worker_count: usize) -> Arc<Self> {
        let this = Arc::new(Self {
            gate: Mutex::new(),
            not_empty: CondVar::new(),
            queue: Spinlock::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        });
        for _ in 0..worker_count.max(1) {
            let worker = this.clone();
            scheduler.spawn(async move { worker.run().await }).detach();
        }
        this
    }

    async fn run(self: Arc<Self>) -> Result<(), FiberError> {
        loop {
            match self.queue.lock().pop_front() {
                Some(task) => task.invoke(),
                None => {
                    if self.closed.load(Ordering::Acquire) {
                        return Ok(());
                    }
                    let guard = self.gate.lock().await?;
                    if self.queue.lock().is_empty() && !self.closed.load(Ordering::Acquire) {
                        let _ = self.not_empty.wait(guard).await?;
                    }
                }
            }
        }
    }

    /// Enqueues `f`, returning a future for its eventual result.
    pub fn submit(
        &self,
        f: impl FnOnce() -> Result<T, FiberError> + Send + 'static,
    ) -> Result<FiberFuture<T>, FiberError> {
        let task = PackagedTask::new(f);
        let future = task.get_future()?;
        self.queue.lock().push_back(task);
        self.not_empty.notify_one();
        Ok(future)
    }

    /// Tells the worker fibers to exit once the queue drains.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.not_empty.notify_all();
    }
}

/// A single dedicated fiber repeatedly applying one function to queued
/// arguments, each call producing its own future — useful when the
/// "task" is really just "this one function, called a lot", without the
/// overhead of boxing a fresh closure per call the way [`Executor`] does.
pub struct AsyncFunction<A, T> {
    gate: Mutex,
    not_empty: CondVar,
    queue: Spinlock<VecDeque<(A, Promise<T>)>>,
    closed: AtomicBool,
}

impl<A: Send + 'static, T: Send + 'static> AsyncFunction<A, T> {
    pub fn new<F>(scheduler: &Arc<Scheduler>, f: F) -> Arc<Self>
    where
        F: Fn(A) -> Result<T, FiberError> + Send + 'static,
    {
        let this = Arc::new(Self {
            gate: Mutex::new(),
            not_empty: CondVar::new(),
            queue: Spinlock::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        });
        let worker = this.clone();
        scheduler.spawn(async move { worker.run(f).await }).detach();
        this
    }

    async fn run<F>(self: Arc<Self>, f: F) -> Result<(), FiberError>
    where
        F: Fn(A) -> Result<T, FiberError>,
    {
        loop {
            match self.queue.lock().pop_front() {
                Some((arg, promise)) => {
                    let _ = match f(arg) {
                        Ok(value) => promise.set_value(value),
                        Err(err) => promise.set_exception(err),
                    };
                }
                None => {
                    if self.closed.load(Ordering::Acquire) {
                        return Ok(());
                    }
                    let guard = self.gate.lock().await?;
                    if self.queue.lock().is_empty() && !self.closed.load(Ordering::Acquire) {
                        let _ = self.not_empty.wait(guard).await?;
                    }
                }
            }
        }
    }

    /// Queues `arg`, returning a future for the result of applying the
    /// wrapped function to it.
    pub fn call(&self, arg: A) -> Result<FiberFuture<T>, FiberError> {
        let promise = Promise::new();
        let future = promise.get_future()?;
        self.queue.lock().push_back((arg, promise));
        self.not_empty.notify_one();
        Ok(future)
    }

    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.not_empty.notify_all();
    }
}

/// A pool of real OS threads for calls that must genuinely block (file
/// I/O, a blocking C library, ...). [`ForeignThreadPool::call`] suspends
/// only the *calling fiber*; the OS thread that happens to be running it
/// stays free to drive other fibers while the foreign call is in flight.
pub struct ForeignThreadPool {
    sender: std::sync::mpsc::Sender<Box<dyn FnOnce() + Send>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ForeignThreadPool {
    pub fn new(worker_count: usize) -> Self {
        let (sender, receiver) = std::sync::mpsc::channel::<Box<dyn FnOnce() + Send>>();
        let receiver = Arc::new(std::sync::Mutex::new(receiver));
        let workers = (0..worker_count.max(1))
            .map(|i| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("fiber-foreign-{i}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.lock().unwrap().recv() {
                            job();
                        }
                    })
                    .expect("failed to spawn foreign worker thread")
            })
            .collect();
        Self { sender, workers }
    }

    /// Runs `f` on the pool, suspending the calling fiber until it
    /// completes.
    pub async fn call<F, T>(&self, f: F) -> Result<T, FiberError>
    where
        F: FnOnce() -> Result<T, FiberError> + Send + 'static,
        T: Send + 'static,
    {
        let task = PackagedTask::new(f);
        let future = task.get_future()?;
        self.sender
            .send(Box::new(move || task.invoke()))
            .map_err(|_| FiberError::Invariant("foreign thread pool is shut down"))?;
        future.get().await
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ForeignThreadPool {
    fn drop(&mut self) {
        // Dropping `sender` closes the channel; each worker's `recv`
        // loop then exits on its own, so we just wait for them.
        for worker in std::mem::take(&mut self.workers) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerConfig;

    #[test]
    fn spawn_async_runs_and_resolves() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 2,
            ..Default::default()
        });
        let handle = scheduler.spawn({
            let scheduler = scheduler.clone();
            async move {
                let future = spawn_async(&scheduler, || Ok(21 * 2));
                future.get().await
            }
        });
        assert_eq!(handle.block_on_and_rethrow().unwrap(), 42);
        scheduler.shutdown();
        scheduler.join_workers();
    }

    #[test]
    fn executor_runs_submitted_tasks() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 2,
            ..Default::default()
        });
        let executor = Executor::new(&scheduler, 2);
        let handle = scheduler.spawn({
            let executor = executor.clone();
            async move {
                let f1 = executor.submit(|| Ok(1))?;
                let f2 = executor.submit(|| Ok(2))?;
                Ok::<_, FiberError>((f1.get().await?, f2.get().await?))
            }
        });
        assert_eq!(handle.block_on_and_rethrow().unwrap(), (1, 2));
        executor.shutdown();
        scheduler.shutdown();
        scheduler.join_workers();
    }

    #[test]
    fn foreign_thread_pool_completes_blocking_calls() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 2,
            ..Default::default()
        });
        let pool = Arc::new(ForeignThreadPool::new(2));
        let handle = scheduler.spawn({
            let pool = pool.clone();
            async move {
                pool.call(|| {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    Ok(99)
                })
                .await
            }
        });
        assert_eq!(handle.block_on_and_rethrow().unwrap(), 99);
        scheduler.shutdown();
        scheduler.join_workers();
    }
}
