// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Combinators over several futures at once (spec §4.6 `wait_for_any`/
//! `wait_for_all`). Boost distinguishes a thread-blocking `wait_for_all`
//! from a fiber-suspending `async_wait_for_all`; in this crate awaiting
//! *anything* only ever suspends the calling fiber (never the OS worker
//! thread underneath it), so that distinction collapses — both names are
//! provided as aliases of the same implementation, resolved this way in
//! `SPEC_FULL.md` §9.

use super::promise::Future;
use crate::error::FiberError;
use std::future::Future as StdFuture;
use std::pin::Pin;
use std::task::{Context, Poll};

type BoxedGet<T> = Pin<Box<dyn StdFuture<Output = Result<T, FiberError>> + Send>>;

enum Slot<T> {
    Pending(BoxedGet<T>),
    Done(Result<T, FiberError>),
}

/// Suspends until every future in `futures` has resolved, returning their
/// results in the original order.
pub async fn wait_for_all<T: Send + 'static>(futures: Vec<Future<T>>) -> Vec<Result<T, FiberError>> {
    JoinAll {
        slots: futures
            .into_iter()
            .map(|f| Slot::Pending(Box::pin(f.get())))
            .collect(),
    }
    .await
}

/// Alias of [`wait_for_all`] — see module docs.
pub async fn async_wait_for_all<T: Send + 'static>(futures: Vec<Future<T>>) -> Vec<Result<T, FiberError>> {
    wait_for_all(futures).await
}

struct JoinAll<T> {
    slots: Vec<Slot<T>>,
}

impl<T> StdFuture for JoinAll<T> {
    type Output = Vec<Result<T, FiberError>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut all_done = true;
        for slot in this.slots.iter_mut() {
            if let Slot::Pending(fut) = slot {
                match fut.as_mut().poll(cx) {
                    Poll::Ready(result) => *slot = Slot::Done(result),
                    Poll::Pending => all_done = false,
                }
            }
        }
        if !all_done {
            return Poll::Pending;
        }
        let results = std::mem::take(&mut this.slots)
            .into_iter()
            .map(|slot| match slot {
                Slot::Done(result) => result,
                Slot::Pending(_) => unreachable!("all slots checked done above"),
            })
            .collect();
        Poll::Ready(results)
    }
}

/// Suspends until the first future in `futures` resolves, returning its
/// index and result. The remaining, still-unresolved futures are
/// dropped — `SPEC_FULL.md` §9 resolves the Open Question of whether to
/// hand them back to the caller in favor of this simpler one-shot race,
/// since nothing else in this crate needs to resume a partially-awaited
/// future.
pub async fn wait_for_any<T: Send + 'static>(futures: Vec<Future<T>>) -> (usize, Result<T, FiberError>) {
    RaceAny {
        slots: futures
            .into_iter()
            .map(|f| Some(Box::pin(f.get()) as BoxedGet<T>))
            .collect(),
    }
    .await
}

/// Alias of [`wait_for_any`] — see module docs.
pub async fn async_wait_for_any<T: Send + 'static>(
    futures: Vec<Future<T>>,
) -> (usize, Result<T, FiberError>) {
    wait_for_any(futures).await
}

struct RaceAny<T> {
    slots: Vec<Option<BoxedGet<T>>>,
}

impl<T> StdFuture for RaceAny<T> {
    type Output = (usize, Result<T, FiberError>);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        for (index, slot) in this.slots.iter_mut().enumerate() {
            if let Some(fut) = slot {
                if let Poll::Ready(result) = fut.as_mut().poll(cx) {
                    return Poll::Ready((index, result));
                }
            }
        }
        Poll::Pending
    }
}
