// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `Promise`/`Future` pairs (spec §4.6): the producer/consumer halves of a
//! one-shot value handed from one fiber (or a foreign OS thread) to
//! another. Grounded on the teacher's `sync::oneshot` channel
//! (`libs/async-exec/src/sync/oneshot.rs`) — the same `Arc<Inner>` +
//! waiter-list shape — adapted so the consumer side is a fiber-aware
//! `Future` rather than a raw channel receiver, and so a dropped `Promise`
//! resolves its `Future` with [`FutureError::BrokenPromise`] instead of a
//! plain "channel closed".

use crate::error::{FiberError, FutureError, FutureStatus};
use crate::fiber;
use crate::spinlock::Spinlock;
use std::future::Future as StdFuture;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

type Continuation<T> = Box<dyn FnOnce(Result<T, FiberError>) + Send>;

pub(crate) struct Inner<T> {
    pub(crate) slot: Spinlock<Option<Result<T, FiberError>>>,
    pub(crate) waiters: Spinlock<Vec<Waker>>,
    continuation: Spinlock<Option<Continuation<T>>>,
    future_taken: std::sync::atomic::AtomicBool,
    delivered: std::sync::atomic::AtomicBool,
}

impl<T> Inner<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Spinlock::new(None),
            waiters: Spinlock::new(Vec::new()),
            continuation: Spinlock::new(None),
            future_taken: std::sync::atomic::AtomicBool::new(false),
            delivered: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub(crate) fn wake_all(&self) {
        let waiters: Vec<Waker> = std::mem::take(&mut self.waiters.lock());
        for waker in waiters {
            waker.wake();
        }
    }

    /// Delivers `result` exactly once: to a registered `then` continuation
    /// if one beat us to it, otherwise into `slot` for `get`/`wait` to pick
    /// up. Callers must already have exclusive delivery rights (checked
    /// via `delivered`).
    fn deliver(&self, result: Result<T, FiberError>) {
        if let Some(continuation) = self.continuation.lock().take() {
            continuation(result);
        } else {
            *self.slot.lock() = Some(result);
            self.wake_all();
        }
    }
}

/// The producing half of a one-shot value.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Promise<T> {
    pub fn new() -> Self {
        Self { inner: Inner::new() }
    }

    /// Returns the associated [`Future`]. Callable only once.
    ///
    /// # Errors
    /// [`FutureError::FutureAlreadyRetrieved`] if called a second time.
    pub fn get_future(&self) -> Result<Future<T>, FiberError> {
        if self.inner.future_taken.swap(true, std::sync::atomic::Ordering::AcqRel) {
            return Err(FutureError::FutureAlreadyRetrieved.into());
        }
        Ok(Future {
            inner: Some(self.inner.clone()),
        })
    }

    /// Satisfies the promise with `value`.
    ///
    /// # Errors
    /// [`FutureError::PromiseAlreadySatisfied`] if already set.
    pub fn set_value(&self, value: T) -> Result<(), FiberError> {
        self.satisfy(Ok(value))
    }

    /// Satisfies the promise with an error, delivered to the waiting
    /// [`Future`] as its `Err`.
    pub fn set_exception(&self, error: FiberError) -> Result<(), FiberError> {
        self.satisfy(Err(error))
    }

    fn satisfy(&self, result: Result<T, FiberError>) -> Result<(), FiberError> {
        if self
            .inner
            .delivered
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            return Err(FutureError::PromiseAlreadySatisfied.into());
        }
        self.inner.deliver(result);
        Ok(())
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if !self
            .inner
            .delivered
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            self.inner.deliver(Err(FutureError::BrokenPromise.into()));
        }
    }
}

/// The consuming half: an `.await`-able value, retrievable exactly once.
///
/// A default-constructed (or already-consumed) `Future` holds no shared
/// state at all; calling [`Future::get`] on it yields
/// [`FutureError::NoState`].
pub struct Future<T> {
    pub(crate) inner: Option<Arc<Inner<T>>>,
}

impl<T> Future<T> {
    pub(crate) fn none() -> Self {
        Self { inner: None }
    }

    /// `true` if this future still has shared state to wait on.
    pub fn valid(&self) -> bool {
        self.inner.is_some()
    }

    /// Consumes the future, resolving to the value (or error) the
    /// matching [`Promise`] was satisfied with.
    pub async fn get(mut self) -> Result<T, FiberError>
    where
        T: Send + 'static,
    {
        let Some(inner) = self.inner.take() else {
            return Err(FutureError::NoState.into());
        };
        GetFuture { inner, registered: false }.await
    }

    /// Converts this future into a cloneable [`crate::future::SharedFuture`],
    /// consuming it the way `std::future<T>::share()` does.
    pub fn share(mut self) -> crate::future::SharedFuture<T>
    where
        T: Clone + Send + 'static,
    {
        let inner = self.inner.take();
        crate::future::SharedFuture::from_inner(inner)
    }

    /// Suspends the calling fiber until the value is ready, without
    /// consuming it; a later `.get()` retrieves it.
    pub async fn wait(&self) -> Result<(), FiberError> {
        let Some(inner) = self.inner.clone() else {
            return Err(FutureError::NoState.into());
        };
        WaitFuture { inner, registered: false }.await
    }

    /// Like [`Future::wait`] but gives up after `dur`.
    pub async fn wait_for(&self, dur: std::time::Duration) -> Result<FutureStatus, FiberError> {
        self.wait_until(Instant::now() + dur).await
    }

    /// Like [`Future::wait`] but gives up at `deadline`.
    pub async fn wait_until(&self, deadline: Instant) -> Result<FutureStatus, FiberError> {
        let Some(inner) = self.inner.clone() else {
            return Err(FutureError::NoState.into());
        };
        TimedWaitFuture {
            inner,
            deadline,
            state: TimedWaitState::Start,
        }
        .await
    }

    /// Runs `f` with the eventual result, scheduled as a new detached
    /// fiber on the calling fiber's scheduler: immediately if this future
    /// is already ready, otherwise as soon as its promise is satisfied.
    ///
    /// # Panics
    /// Panics if called from outside a fiber.
    pub fn then<F, U>(mut self, f: F) -> Future<U>
    where
        F: FnOnce(Result<T, FiberError>) -> Result<U, FiberError> + Send + 'static,
        T: Send + 'static,
        U: Send + 'static,
    {
        let scheduler = fiber::current()
            .expect("Future::then called outside of a fiber")
            .scheduler()
            .clone();
        let promise = Promise::<U>::new();
        let future = promise.get_future().expect("freshly created promise");
        let Some(inner) = self.inner.take() else {
            let _ = promise.set_exception(FutureError::NoState.into());
            return future;
        };
        let run = move |result: Result<T, FiberError>| {
            scheduler
                .spawn(async move {
                    match f(result) {
                        Ok(value) => {
                            let _ = promise.set_value(value);
                        }
                        Err(err) => {
                            let _ = promise.set_exception(err);
                        }
                    }
                    Ok::<(), FiberError>(())
                })
                .detach();
        };
        if let Some(result) = inner.slot.lock().take() {
            run(result);
            return future;
        }
        *inner.continuation.lock() = Some(Box::new(run));
        // `deliver` may have raced in between our slot check above and
        // storing the continuation, finding no continuation yet and
        // leaving the result in `slot`; recover it if so.
        if let Some(result) = inner.slot.lock().take() {
            if let Some(cont) = inner.continuation.lock().take() {
                cont(result);
            }
        }
        future
    }
}

struct WaitFuture<T> {
    inner: Arc<Inner<T>>,
    registered: bool,
}

impl<T> StdFuture for WaitFuture<T> {
    type Output = Result<(), FiberError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.registered {
            if let Some(fiber) = fiber::current() {
                if let Err(e) = fiber.interruption_point() {
                    return Poll::Ready(Err(e));
                }
            }
        }
        // Hold `slot` across the check and the registration, mirroring
        // `GetFuture`: otherwise a `deliver` landing in between would
        // write the value and drain an empty waiter list, and this wait
        // would never be woken.
        let slot = this.inner.slot.lock();
        if slot.is_some() {
            return Poll::Ready(Ok(()));
        }
        if !this.registered {
            this.inner.waiters.lock().push(cx.waker().clone());
            this.registered = true;
        }
        drop(slot);
        Poll::Pending
    }
}

enum TimedWaitState {
    Start,
    Waiting {
        fired: Arc<std::sync::atomic::AtomicBool>,
        timer: crate::reactor::TimerHandle,
    },
}

struct TimedWaitFuture<T> {
    inner: Arc<Inner<T>>,
    deadline: Instant,
    state: TimedWaitState,
}

impl<T> Drop for TimedWaitFuture<T> {
    fn drop(&mut self) {
        if let TimedWaitState::Waiting { timer, .. } = &self.state {
            timer.cancel();
        }
    }
}

impl<T> StdFuture for TimedWaitFuture<T> {
    type Output = Result<FutureStatus, FiberError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        use std::sync::atomic::Ordering;
        let this = self.get_mut();
        // As with `WaitFuture`, the slot lock must stay held across the
        // readiness check and the waiter registration below so a racing
        // `deliver` can't land in between and wake an empty waiter list.
        let slot = this.inner.slot.lock();
        if slot.is_some() {
            if let TimedWaitState::Waiting { timer, .. } = &this.state {
                timer.cancel();
            }
            drop(slot);
            return Poll::Ready(Ok(FutureStatus::Ready));
        }
        match &this.state {
            TimedWaitState::Start => {
                if Instant::now() >= this.deadline {
                    drop(slot);
                    return Poll::Ready(Ok(FutureStatus::Timeout));
                }
                this.inner.waiters.lock().push(cx.waker().clone());
                drop(slot);
                let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
                let fired2 = fired.clone();
                let waker = cx.waker().clone();
                let timer = fiber::current().map(|f| {
                    f.scheduler().reactor().arm_at(this.deadline, move |outcome| {
                        if outcome == crate::reactor::TimerOutcome::Fired {
                            fired2.store(true, Ordering::Release);
                            waker.wake();
                        }
                    })
                });
                let Some(timer) = timer else {
                    return Poll::Ready(Err(FiberError::Invariant("wait_until used outside of a fiber")));
                };
                this.state = TimedWaitState::Waiting { fired, timer };
                Poll::Pending
            }
            TimedWaitState::Waiting { fired, .. } => {
                if let Some(fiber) = fiber::current() {
                    if let Err(e) = fiber.interruption_point() {
                        return Poll::Ready(Err(e));
                    }
                }
                if fired.load(Ordering::Acquire) {
                    Poll::Ready(Ok(FutureStatus::Timeout))
                } else {
                    Poll::Pending
                }
            }
        }
    }
}

struct GetFuture<T> {
    inner: Arc<Inner<T>>,
    registered: bool,
}

impl<T> StdFuture for GetFuture<T> {
    type Output = Result<T, FiberError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.registered {
            if let Some(fiber) = fiber::current() {
                if let Err(e) = fiber.interruption_point() {
                    return Poll::Ready(Err(e));
                }
            }
        }
        let mut slot = this.inner.slot.lock();
        if let Some(result) = slot.take() {
            return Poll::Ready(result);
        }
        if !this.registered {
            this.inner.waiters.lock().push(cx.waker().clone());
            this.registered = true;
        }
        Poll::Pending
    }
}

/// A future that resolves immediately with `value` (spec §4.6
/// `make_ready_future`), without ever suspending.
pub fn make_ready_future<T: Send + 'static>(value: T) -> Future<T> {
    let promise = Promise::new();
    // Infallible: freshly created promise, set exactly once.
    promise.set_value(value).expect("fresh promise cannot already be satisfied");
    promise.get_future().expect("fresh promise's future not yet retrieved")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Scheduler, SchedulerConfig};
    use std::time::Duration;

    #[test]
    fn get_resolves_with_the_set_value() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 1,
            ..Default::default()
        });
        let handle = scheduler.spawn(async {
            let promise = Promise::new();
            let future = promise.get_future()?;
            promise.set_value(42)?;
            future.get().await
        });
        assert_eq!(handle.block_on_and_rethrow().unwrap(), 42);
        scheduler.shutdown();
        scheduler.join_workers();
    }

    #[test]
    fn dropped_promise_breaks_the_future() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 1,
            ..Default::default()
        });
        let handle = scheduler.spawn(async {
            let promise = Promise::<i32>::new();
            let future = promise.get_future()?;
            drop(promise);
            match future.get().await {
                Err(FiberError::Future(FutureError::BrokenPromise)) => Ok(()),
                other => panic!("expected a broken promise, got {other:?}"),
            }
        });
        handle.block_on_and_rethrow().unwrap();
        scheduler.shutdown();
        scheduler.join_workers();
    }

    #[test]
    fn wait_then_get_does_not_consume_the_value_early() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 1,
            ..Default::default()
        });
        let handle = scheduler.spawn(async {
            let promise = Promise::new();
            let future = promise.get_future()?;
            promise.set_value(7)?;
            future.wait().await?;
            future.get().await
        });
        assert_eq!(handle.block_on_and_rethrow().unwrap(), 7);
        scheduler.shutdown();
        scheduler.join_workers();
    }

    #[test]
    fn wait_for_reports_timeout_before_the_value_arrives() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 1,
            ..Default::default()
        });
        let handle = scheduler.spawn(async {
            let promise: Promise<i32> = Promise::new();
            let future = promise.get_future()?;
            let status = future.wait_for(Duration::from_millis(5)).await?;
            // `promise` is dropped here without being satisfied, which is
            // fine: the wait already timed out before that matters.
            drop(promise);
            Ok::<_, FiberError>(status)
        });
        assert_eq!(handle.block_on_and_rethrow().unwrap(), FutureStatus::Timeout);
        scheduler.shutdown();
        scheduler.join_workers();
    }

    #[test]
    fn then_on_an_already_ready_future_runs_promptly() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 2,
            ..Default::default()
        });
        let handle = scheduler.spawn(async {
            let future = make_ready_future(10);
            future.then(|result| result.map(|v| v * 2)).get().await
        });
        assert_eq!(handle.block_on_and_rethrow().unwrap(), 20);
        scheduler.shutdown();
        scheduler.join_workers();
    }

    #[test]
    fn then_on_a_not_yet_ready_future_runs_once_satisfied() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 2,
            ..Default::default()
        });
        let handle = scheduler.spawn({
            let scheduler_for_producer = scheduler.clone();
            async move {
                let promise = Promise::new();
                let future = promise.get_future()?;
                let continued = future.then(|result| result.map(|v: i32| v + 1));
                scheduler_for_producer
                    .spawn(async move {
                        let _ = promise.set_value(9);
                        Ok::<(), FiberError>(())
                    })
                    .detach();
                continued.get().await
            }
        });
        assert_eq!(handle.block_on_and_rethrow().unwrap(), 10);
        scheduler.shutdown();
        scheduler.join_workers();
    }
}
