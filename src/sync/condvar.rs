// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A condition variable for fibers (spec §4.4), used together with a
//! [`Mutex`] guard the same way `std::sync::Condvar` is: release the lock
//! while suspended, reacquire it before returning. `notify_all_at_thread_exit`
//! is represented by letting callers register the notification as an
//! `at_exit` hook on the current fiber (see `fiber::FiberInner::at_exit`).
//!
//! Like `std::sync::Condvar`, waiting on the same condvar with two
//! different mutexes is a misuse, not a race to resolve silently; the
//! first mutex a `wait`/`wait_for` call sees becomes this condvar's bound
//! mutex, and a later call with a different one is rejected with
//! [`FiberError::Permission`] rather than left to corrupt the wait queue.
//! Unlocking a mutex the calling fiber doesn't own is a separate case the
//! spec names for the same error, but it can't arise here at all: a
//! [`MutexGuard`] is only ever constructed for the fiber that acquired
//! it, so there is no unlock call to make on another fiber's behalf.

use crate::error::{CondVarStatus, FiberError};
use crate::fiber;
use crate::loom::sync::atomic::{AtomicBool, Ordering};
use crate::spinlock::Spinlock;
use crate::sync::mutex::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

struct Entry {
    waker: Waker,
    live: Arc<AtomicBool>,
}

/// A FIFO-ordered condition variable.
pub struct CondVar {
    waiters: Spinlock<VecDeque<Entry>>,
    // Address of the one `Mutex` this condvar has been waited on with so
    // far, the way a `std::condition_variable` is only ever safe to use
    // with a single mutex across all of its concurrent waiters.
    bound_mutex: Spinlock<Option<usize>>,
}

impl CondVar {
    pub fn new() -> Self {
        Self {
            waiters: Spinlock::new(VecDeque::new()),
            bound_mutex: Spinlock::new(None),
        }
    }

    /// Releases `guard`, suspends the calling fiber until notified, then
    /// reacquires the mutex before returning.
    ///
    /// The calling fiber is enqueued onto the condvar's wait list before
    /// `guard` is released, so a concurrent `notify_one`/`notify_all` can
    /// never slip into the gap between "unlocked" and "waiting" and be
    /// missed.
    ///
    /// # Errors
    /// [`FiberError::Permission`] if `guard` locks a different [`Mutex`]
    /// than a previous wait on this condvar used.
    pub async fn wait<'a>(&self, guard: MutexGuard<'a>) -> Result<MutexGuard<'a>, FiberError> {
        let mutex = Self::mutex_of(&guard);
        self.check_mutex(mutex)?;
        WaitFuture {
            cv: self,
            guard: Some(guard),
            state: WaitState::Start,
        }
        .await?;
        mutex.lock().await
    }

    /// Like [`CondVar::wait`] but gives up after `dur`, reporting whether
    /// it was woken or timed out via [`CondVarStatus`].
    ///
    /// # Errors
    /// [`FiberError::Permission`] if `guard` locks a different [`Mutex`]
    /// than a previous wait on this condvar used.
    pub async fn wait_for<'a>(
        &self,
        guard: MutexGuard<'a>,
        dur: Duration,
    ) -> Result<(MutexGuard<'a>, CondVarStatus), FiberError> {
        let mutex = Self::mutex_of(&guard);
        self.check_mutex(mutex)?;
        let status = TimedWaitFuture {
            cv: self,
            guard: Some(guard),
            deadline: Instant::now() + dur,
            state: TimedWaitState::Start,
        }
        .await?;
        let guard = mutex.lock().await?;
        Ok((guard, status))
    }

    /// Wakes one waiting fiber, if any.
    pub fn notify_one(&self) {
        if let Some(entry) = self.pop_live() {
            entry.waker.wake();
        }
    }

    /// Wakes every waiting fiber.
    pub fn notify_all(&self) {
        let entries: Vec<_> = self.waiters.lock().drain(..).collect();
        for entry in entries {
            if entry.live.swap(false, Ordering::AcqRel) {
                entry.waker.wake();
            }
        }
    }

    /// Registers a [`CondVar::notify_all`] to run when the *calling
    /// fiber* exits, regardless of how it exits.
    pub fn notify_all_at_thread_exit(self: &Arc<Self>) {
        let cv = self.clone();
        if let Some(fiber) = fiber::current() {
            fiber.at_exit(move || cv.notify_all());
        } else {
            self.notify_all();
        }
    }

    fn pop_live(&self) -> Option<Entry> {
        let mut waiters = self.waiters.lock();
        while let Some(entry) = waiters.pop_front() {
            if entry.live.swap(false, Ordering::AcqRel) {
                return Some(entry);
            }
        }
        None
    }

    fn mutex_of<'a>(guard: &MutexGuard<'a>) -> &'a Mutex {
        // SAFETY-free accessor: `MutexGuard` already exposes the mutex it
        // guards via its private field; we just need it back to relock.
        guard.mutex_ref()
    }

    /// Binds this condvar to `mutex` on first use, and rejects any later
    /// wait that shows up with a different one.
    fn check_mutex(&self, mutex: &Mutex) -> Result<(), FiberError> {
        let addr = mutex as *const Mutex as usize;
        let mut bound = self.bound_mutex.lock();
        match *bound {
            Some(existing) if existing != addr => Err(FiberError::Permission(
                "condition variable waited on with more than one mutex",
            )),
            Some(_) => Ok(()),
            None => {
                *bound = Some(addr);
                Ok(())
            }
        }
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

enum WaitState {
    Start,
    Waiting { live: Arc<AtomicBool> },
}

struct WaitFuture<'a> {
    cv: &'a CondVar,
    guard: Option<MutexGuard<'a>>,
    state: WaitState,
}

impl Future for WaitFuture<'_> {
    type Output = Result<(), FiberError>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &this.state {
            WaitState::Start => {
                let live = Arc::new(AtomicBool::new(true));
                this.cv.waiters.lock().push_back(Entry {
                    waker: cx.waker().clone(),
                    live: live.clone(),
                });
                this.state = WaitState::Waiting { live };
                // Only release the mutex now that we're enqueued, so a
                // racing notifier can never find an empty wait list.
                this.guard.take();
                Poll::Pending
            }
            WaitState::Waiting { live } => {
                if let Some(fiber) = fiber::current() {
                    if let Err(e) = fiber.interruption_point() {
                        return Poll::Ready(Err(e));
                    }
                }
                if live.load(Ordering::Acquire) {
                    Poll::Pending
                } else {
                    Poll::Ready(Ok(()))
                }
            }
        }
    }
}

enum TimedWaitState {
    Start,
    Waiting {
        live: Arc<AtomicBool>,
        timer: Option<crate::reactor::TimerHandle>,
    },
}

struct TimedWaitFuture<'a> {
    cv: &'a CondVar,
    guard: Option<MutexGuard<'a>>,
    deadline: Instant,
    state: TimedWaitState,
}

impl Drop for TimedWaitFuture<'_> {
    fn drop(&mut self) {
        if let TimedWaitState::Waiting { timer: Some(timer), .. } = &self.state {
            timer.cancel();
        }
    }
}

impl Future for TimedWaitFuture<'_> {
    type Output = Result<CondVarStatus, FiberError>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &this.state {
            TimedWaitState::Start => {
                let live = Arc::new(AtomicBool::new(true));
                this.cv.waiters.lock().push_back(Entry {
                    waker: cx.waker().clone(),
                    live: live.clone(),
                });
                let live2 = live.clone();
                let waker = cx.waker().clone();
                let timer = fiber::current().map(|f| {
                    f.scheduler().reactor().arm_at(this.deadline, move |outcome| {
                        if outcome == crate::reactor::TimerOutcome::Fired
                            && live2.swap(false, Ordering::AcqRel)
                        {
                            waker.wake();
                        }
                    })
                });
                this.state = TimedWaitState::Waiting { live, timer };
                // Same ordering as `WaitFuture`: release only after the
                // timer is armed and the entry is enqueued.
                this.guard.take();
                Poll::Pending
            }
            TimedWaitState::Waiting { live, .. } => {
                if let Some(fiber) = fiber::current() {
                    if let Err(e) = fiber.interruption_point() {
                        return Poll::Ready(Err(e));
                    }
                }
                if live.load(Ordering::Acquire) {
                    if Instant::now() >= this.deadline {
                        // Timer hasn't run yet but we've already reached
                        // the deadline; treat it as a timeout.
                        if live.swap(false, Ordering::AcqRel) {
                            if let TimedWaitState::Waiting { timer, .. } = &this.state {
                                if let Some(t) = timer {
                                    t.cancel();
                                }
                            }
                            return Poll::Ready(Ok(CondVarStatus::Timeout));
                        }
                    }
                    return Poll::Pending;
                }
                if let TimedWaitState::Waiting { timer, .. } = &this.state {
                    if let Some(t) = timer {
                        t.cancel();
                    }
                }
                let status = if Instant::now() >= this.deadline {
                    CondVarStatus::Timeout
                } else {
                    CondVarStatus::NoTimeout
                };
                Poll::Ready(Ok(status))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Scheduler, SchedulerConfig};

    #[test]
    fn wakes_a_waiter_on_notify() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 2,
            ..Default::default()
        });
        let mutex = Arc::new(Mutex::new());
        let cv = Arc::new(CondVar::new());
        let ready = Arc::new(AtomicBool::new(false));

        let waiter = {
            let mutex = mutex.clone();
            let cv = cv.clone();
            let ready = ready.clone();
            scheduler.spawn(async move {
                let mut guard = mutex.lock().await?;
                while !ready.load(Ordering::SeqCst) {
                    guard = cv.wait(guard).await?;
                }
                Ok::<(), FiberError>(())
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        scheduler
            .spawn({
                let mutex = mutex.clone();
                let cv = cv.clone();
                let ready = ready.clone();
                async move {
                    let _guard = mutex.lock().await?;
                    ready.store(true, Ordering::SeqCst);
                    cv.notify_one();
                    Ok::<(), FiberError>(())
                }
            })
            .detach();

        waiter.block_on_and_rethrow().unwrap();
        scheduler.shutdown();
        scheduler.join_workers();
    }

    #[test]
    fn wait_for_reports_timeout() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 1,
            ..Default::default()
        });
        let mutex = Arc::new(Mutex::new());
        let cv = Arc::new(CondVar::new());
        let handle = {
            let mutex = mutex.clone();
            let cv = cv.clone();
            scheduler.spawn(async move {
                let guard = mutex.lock().await?;
                let (_guard, status) = cv.wait_for(guard, Duration::from_millis(10)).await?;
                Ok::<_, FiberError>(status)
            })
        };
        let status = handle.block_on_and_rethrow().unwrap();
        assert_eq!(status, CondVarStatus::Timeout);
        scheduler.shutdown();
        scheduler.join_workers();
    }

    #[test]
    fn waiting_with_a_second_mutex_is_rejected() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 1,
            ..Default::default()
        });
        let mutex_a = Arc::new(Mutex::new());
        let mutex_b = Arc::new(Mutex::new());
        let cv = Arc::new(CondVar::new());
        let handle = scheduler.spawn({
            let mutex_a = mutex_a.clone();
            let mutex_b = mutex_b.clone();
            let cv = cv.clone();
            async move {
                let guard_a = mutex_a.lock().await?;
                let (guard_a, _) = cv.wait_for(guard_a, Duration::from_millis(5)).await?;
                drop(guard_a);
                let guard_b = mutex_b.lock().await?;
                match cv.wait(guard_b).await {
                    Err(FiberError::Permission(_)) => Ok(()),
                    other => panic!("expected a permission error, got {other:?}"),
                }
            }
        });
        handle.block_on_and_rethrow().unwrap();
        scheduler.shutdown();
        scheduler.join_workers();
    }
}
