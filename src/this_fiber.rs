// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Free functions operating on "whichever fiber is currently running on
//! this OS thread" (spec §6), the Rust counterpart of Boost.Fiber's
//! `boost::this_fiber` namespace.

use crate::error::{FiberError, FiberId};
use crate::fiber;
use crate::strand::Strand;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// The running fiber's id.
///
/// # Errors
/// [`FiberError::Invariant`] if called outside of a fiber.
pub fn id() -> Result<FiberId, FiberError> {
    fiber::current()
        .map(|f| f.id())
        .ok_or(FiberError::Invariant("this_fiber::id() called outside of a fiber"))
}

/// `true` if the calling OS thread is presently driving a fiber.
pub fn is_a_fiber() -> bool {
    fiber::is_a_fiber()
}

pub fn name() -> Option<String> {
    fiber::current().and_then(|f| f.name())
}

pub fn set_name(name: impl Into<String>) {
    if let Some(fiber) = fiber::current() {
        fiber.set_name(name);
    }
}

/// Registers `f` to run when the calling fiber stops, regardless of how.
pub fn at_exit(f: impl FnOnce() + Send + 'static) {
    if let Some(fiber) = fiber::current() {
        fiber.at_exit(f);
    }
}

pub fn interruption_enabled() -> bool {
    fiber::current().map(|f| f.interruption_enabled()).unwrap_or(true)
}

pub fn interruption_requested() -> bool {
    fiber::current().map(|f| f.interruption_requested()).unwrap_or(false)
}

/// Returns [`FiberError::Interrupted`] if the calling fiber has a pending,
/// currently-enabled interrupt; a no-op otherwise. Every suspension point
/// in this crate calls this on resume; user code can call it directly to
/// add its own checkpoints inside a long synchronous stretch.
pub fn interruption_point() -> Result<(), FiberError> {
    match fiber::current() {
        Some(fiber) => fiber.interruption_point(),
        None => Ok(()),
    }
}

/// An RAII guard disabling interruption of the calling fiber for its
/// lifetime; nests (an inner guard just adds to the count, and
/// interruption only re-enables once every guard has been dropped).
pub struct DisableInterruption {
    fiber: Option<Arc<fiber::FiberInner>>,
}

impl DisableInterruption {
    pub fn new() -> Self {
        let fiber = fiber::current();
        if let Some(fiber) = &fiber {
            fiber.enter_disable_interruption();
        }
        Self { fiber }
    }
}

impl Default for DisableInterruption {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DisableInterruption {
    fn drop(&mut self) {
        if let Some(fiber) = &self.fiber {
            fiber.exit_disable_interruption();
        }
    }
}

/// Disables interruption of the calling fiber until the returned guard is
/// dropped.
pub fn disable_interruption() -> DisableInterruption {
    DisableInterruption::new()
}

/// Voluntarily yields the calling fiber back to the scheduler.
///
/// `hint` is a [`Strand`] the caller expects benefits from running next
/// (typically the strand of a fiber it just unblocked); selectivity
/// policy (spec §4.1 `yield_now(hint)`): this only actually suspends if
/// there is a single worker thread, the live fiber count exceeds twice
/// the worker count, `hint` is this fiber's own strand, or no hint is
/// given at all (always yields). Otherwise it's a no-op, since handing
/// control back to the scheduler wouldn't change what runs next.
pub async fn yield_now(hint: Option<&Strand>) {
    let Some(fiber) = fiber::current() else { return };
    let scheduler = fiber.scheduler();
    let should_yield = scheduler.worker_count() <= 1
        || scheduler.live_fiber_count() > 2 * scheduler.worker_count()
        || match hint {
            None => true,
            Some(hint_strand) => fiber.strand() == hint_strand,
        };
    if should_yield {
        YieldOnce { done: false }.await;
    }
}

struct YieldOnce {
    done: bool,
}

impl Future for YieldOnce {
    type Output = ();
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.done {
            return Poll::Ready(());
        }
        self.done = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Suspends the calling fiber until `deadline`.
pub async fn sleep_until(deadline: Instant) -> Result<(), FiberError> {
    SleepFuture {
        deadline,
        state: SleepState::Start,
    }
    .await
}

/// Suspends the calling fiber for `dur`.
pub async fn sleep_for(dur: Duration) -> Result<(), FiberError> {
    sleep_until(Instant::now() + dur).await
}

enum SleepState {
    Start,
    Waiting {
        fired: Arc<crate::loom::sync::atomic::AtomicBool>,
        timer: crate::reactor::TimerHandle,
    },
}

struct SleepFuture {
    deadline: Instant,
    state: SleepState,
}

impl Drop for SleepFuture {
    fn drop(&mut self) {
        if let SleepState::Waiting { timer, .. } = &self.state {
            timer.cancel();
        }
    }
}

impl Future for SleepFuture {
    type Output = Result<(), FiberError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        use crate::loom::sync::atomic::Ordering;
        let this = self.get_mut();
        match &this.state {
            SleepState::Start => {
                let Some(fiber) = fiber::current() else {
                    return Poll::Ready(Err(FiberError::Invariant("sleep used outside of a fiber")));
                };
                let fired = Arc::new(crate::loom::sync::atomic::AtomicBool::new(false));
                let fired2 = fired.clone();
                let waker = cx.waker().clone();
                let timer = fiber.scheduler().reactor().arm_at(this.deadline, move |_outcome| {
                    fired2.store(true, Ordering::Release);
                    waker.wake();
                });
                this.state = SleepState::Waiting { fired, timer };
                Poll::Pending
            }
            SleepState::Waiting { fired, timer } => {
                if let Some(fiber) = fiber::current() {
                    if let Err(e) = fiber.interruption_point() {
                        timer.cancel();
                        return Poll::Ready(Err(e));
                    }
                }
                if fired.load(Ordering::Acquire) {
                    Poll::Ready(Ok(()))
                } else {
                    Poll::Pending
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Scheduler, SchedulerConfig};

    #[test]
    fn sleep_for_suspends_until_roughly_the_requested_duration() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 1,
            ..Default::default()
        });
        let handle = scheduler.spawn(async {
            let start = Instant::now();
            sleep_for(Duration::from_millis(20)).await?;
            Ok::<_, FiberError>(start.elapsed())
        });
        let elapsed = handle.block_on_and_rethrow().unwrap();
        assert!(elapsed >= Duration::from_millis(15));
        scheduler.shutdown();
        scheduler.join_workers();
    }

    #[test]
    fn yield_now_with_no_hint_always_reschedules() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 2,
            ..Default::default()
        });
        let handle = scheduler.spawn(async {
            yield_now(None).await;
            Ok::<_, FiberError>(id()?)
        });
        assert!(handle.block_on_and_rethrow().is_ok());
        scheduler.shutdown();
        scheduler.join_workers();
    }
}
