// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A cloneable, repeatedly-awaitable future (spec §4.6's `shared_future`
//! analogue), produced by [`crate::future::Future::share`]. Several
//! fibers can each `.get()` their own clone of the eventual value.

use super::promise::Inner;
use crate::error::{FiberError, FutureError, FutureStatus};
use crate::fiber;
use std::future::Future as StdFuture;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

pub struct SharedFuture<T> {
    inner: Option<Arc<Inner<T>>>,
}

impl<T> SharedFuture<T> {
    pub(crate) fn from_inner(inner: Option<Arc<Inner<T>>>) -> Self {
        Self { inner }
    }

    pub fn valid(&self) -> bool {
        self.inner.is_some()
    }
}

impl<T: Clone + Send + 'static> SharedFuture<T> {
    /// Resolves to a clone of the value (or a copy of the error) the
    /// originating promise was satisfied with. Can be called any number
    /// of times, from any number of fibers holding a clone of `self`.
    pub async fn get(&self) -> Result<T, FiberError> {
        let Some(inner) = self.inner.clone() else {
            return Err(FutureError::NoState.into());
        };
        SharedGetFuture { inner, registered: false }.await
    }
}

impl<T: Send + 'static> SharedFuture<T> {
    /// Suspends the calling fiber until the value is ready, without
    /// cloning it out yet.
    pub async fn wait(&self) -> Result<(), FiberError> {
        let Some(inner) = self.inner.clone() else {
            return Err(FutureError::NoState.into());
        };
        SharedWaitFuture { inner, registered: false }.await
    }

    /// Like [`SharedFuture::wait`] but gives up after `dur`.
    pub async fn wait_for(&self, dur: Duration) -> Result<FutureStatus, FiberError> {
        self.wait_until(Instant::now() + dur).await
    }

    /// Like [`SharedFuture::wait`] but gives up at `deadline`.
    pub async fn wait_until(&self, deadline: Instant) -> Result<FutureStatus, FiberError> {
        let Some(inner) = self.inner.clone() else {
            return Err(FutureError::NoState.into());
        };
        SharedTimedWaitFuture {
            inner,
            deadline,
            state: SharedTimedWaitState::Start,
        }
        .await
    }
}

struct SharedWaitFuture<T> {
    inner: Arc<Inner<T>>,
    registered: bool,
}

impl<T> StdFuture for SharedWaitFuture<T> {
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
        // Held across the check and the registration, mirroring
        // `SharedGetFuture`: otherwise a `deliver` landing in between
        // would write the value and drain an empty waiter list.
        let slot = this.inner.slot.lock();
        if slot.is_some() {
            return Poll::Ready(Ok(()));
        }
        if !this.registered {
            register_waker(&this.inner, cx.waker().clone());
            this.registered = true;
        }
        drop(slot);
        Poll::Pending
    }
}

enum SharedTimedWaitState {
    Start,
    Waiting {
        fired: Arc<std::sync::atomic::AtomicBool>,
        timer: crate::reactor::TimerHandle,
    },
}

struct SharedTimedWaitFuture<T> {
    inner: Arc<Inner<T>>,
    deadline: Instant,
    state: SharedTimedWaitState,
}

impl<T> Drop for SharedTimedWaitFuture<T> {
    fn drop(&mut self) {
        if let SharedTimedWaitState::Waiting { timer, .. } = &self.state {
            timer.cancel();
        }
    }
}

impl<T> StdFuture for SharedTimedWaitFuture<T> {
    type Output = Result<FutureStatus, FiberError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        use std::sync::atomic::Ordering;
        let this = self.get_mut();
        // Same ordering fix as `SharedWaitFuture`: keep the slot locked
        // across the check and the registration below.
        let slot = this.inner.slot.lock();
        if slot.is_some() {
            if let SharedTimedWaitState::Waiting { timer, .. } = &this.state {
                timer.cancel();
            }
            drop(slot);
            return Poll::Ready(Ok(FutureStatus::Ready));
        }
        match &this.state {
            SharedTimedWaitState::Start => {
                if Instant::now() >= this.deadline {
                    drop(slot);
                    return Poll::Ready(Ok(FutureStatus::Timeout));
                }
                register_waker(&this.inner, cx.waker().clone());
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
                this.state = SharedTimedWaitState::Waiting { fired, timer };
                Poll::Pending
            }
            SharedTimedWaitState::Waiting { fired, .. } => {
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

impl<T> Clone for SharedFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct SharedGetFuture<T> {
    inner: Arc<Inner<T>>,
    registered: bool,
}

impl<T: Clone> StdFuture for SharedGetFuture<T> {
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
        // Held across the check and the registration: dropping it first
        // would let a racing `deliver` write the value and drain an
        // empty waiter list in the gap.
        let slot = this.inner.slot.lock();
        if let Some(result) = slot.as_ref() {
            return Poll::Ready(result.clone());
        }
        if !this.registered {
            register_waker(&this.inner, cx.waker().clone());
            this.registered = true;
        }
        drop(slot);
        Poll::Pending
    }
}

fn register_waker<T>(inner: &Arc<Inner<T>>, waker: Waker) {
    inner.waiters.lock().push(waker);
}
