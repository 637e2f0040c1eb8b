// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Reactor-completion adapters (spec §4.7): two ways to turn an
//! initiating function of the shape `fn(handler)` — where `handler` is
//! called exactly once with the operation's result — into something a
//! fiber can consume.
//!
//! `use_yield` suspends the calling fiber immediately and resumes it once
//! the handler fires; `use_future` returns a [`crate::future::Future`]
//! right away, without suspending, and the handler satisfies it whenever
//! it eventually fires (possibly from another fiber, a timer, or a
//! foreign thread).
//!
//! Neither adapter can cancel the underlying operation once started —
//! there is no generic way to do that for an arbitrary initiating
//! function — so an interrupted `use_yield` call returns
//! [`FiberError::Interrupted`] to its caller but leaves the operation
//! running; its eventual result is simply dropped.

use crate::error::FiberError;
use crate::fiber;
use crate::future::{Future as FiberFuture, Promise};
use crate::spinlock::Spinlock;
use std::future::Future as StdFuture;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// A handler an initiating function calls exactly once with the
/// operation's outcome.
pub type CompletionHandler<V> = Box<dyn FnOnce(Result<V, FiberError>) + Send>;

/// Suspends the calling fiber until `op`'s handler fires, then resumes
/// with its result.
pub async fn use_yield<V, F>(op: F) -> Result<V, FiberError>
where
    F: FnOnce(CompletionHandler<V>),
    V: Send + 'static,
{
    YieldAdapter {
        op: Some(op),
        slot: Arc::new(Spinlock::new(None)),
    }
    .await
}

struct YieldAdapter<V, F> {
    op: Option<F>,
    slot: Arc<Spinlock<Option<Result<V, FiberError>>>>,
}

impl<V, F> StdFuture for YieldAdapter<V, F>
where
    V: Send + 'static,
    F: FnOnce(CompletionHandler<V>),
{
    type Output = Result<V, FiberError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(op) = this.op.take() {
            let slot = this.slot.clone();
            let waker = cx.waker().clone();
            op(Box::new(move |result| {
                *slot.lock() = Some(result);
                waker.wake();
            }));
            return Poll::Pending;
        }
        if let Some(fiber) = fiber::current() {
            if let Err(e) = fiber.interruption_point() {
                return Poll::Ready(Err(e));
            }
        }
        match this.slot.lock().take() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

/// Starts `op` immediately, returning a future the caller can `.await`
/// whenever convenient, without suspending now.
pub fn use_future<V, F>(op: F) -> FiberFuture<V>
where
    F: FnOnce(CompletionHandler<V>),
    V: Send + 'static,
{
    let promise = Promise::new();
    let future = promise.get_future().expect("freshly created promise");
    op(Box::new(move |result| {
        let _ = match result {
            Ok(value) => promise.set_value(value),
            Err(err) => promise.set_exception(err),
        };
    }));
    future
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::TimerOutcome;
    use crate::scheduler::{Scheduler, SchedulerConfig};
    use std::time::Duration;

    #[test]
    fn use_yield_resumes_with_the_handler_result() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 2,
            ..Default::default()
        });
        let handle = scheduler.spawn(async {
            let reactor = fiber::current().unwrap().scheduler().reactor().clone();
            use_yield(|handler| {
                reactor.arm_after(Duration::from_millis(5), move |outcome| {
                    handler(Ok(outcome == TimerOutcome::Fired));
                });
            })
            .await
        });
        assert!(handle.block_on_and_rethrow().unwrap());
        scheduler.shutdown();
        scheduler.join_workers();
    }

    #[test]
    fn use_future_does_not_suspend_the_caller() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 2,
            ..Default::default()
        });
        let handle = scheduler.spawn(async {
            let reactor = fiber::current().unwrap().scheduler().reactor().clone();
            let future = use_future(|handler: CompletionHandler<u32>| {
                reactor.arm_after(Duration::from_millis(5), move |outcome| {
                    handler(Ok(if outcome == TimerOutcome::Fired { 1 } else { 0 }));
                });
            });
            future.get().await
        });
        assert_eq!(handle.block_on_and_rethrow().unwrap(), 1);
        scheduler.shutdown();
        scheduler.join_workers();
    }
}
