// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A single-slot waker cell, adapted from the teacher's `WaitCell` (an
//! `AtomicWaker`-style primitive) but simplified to a spinlock-guarded
//! `Option<Waker>` rather than a bitflag state machine — this crate's
//! suspension points are each driven by exactly one fiber at a time (see
//! `sync::mutex`'s module docs), so the extra states the teacher's version
//! needs to survive concurrent `register`/`wake` from unrelated tasks
//! don't earn their complexity here.

use crate::loom::sync::atomic::{AtomicBool, Ordering};
use crate::spinlock::Spinlock;
use std::task::Waker;

pub struct WaitCell {
    waker: Spinlock<Option<Waker>>,
    closed: AtomicBool,
}

impl WaitCell {
    pub const fn new() -> Self {
        Self {
            waker: Spinlock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Stores `waker`, replacing whatever was previously registered.
    pub fn register(&self, waker: &Waker) {
        *self.waker.lock() = Some(waker.clone());
    }

    /// Wakes and clears the registered waker, if any. A no-op if nothing
    /// is registered (e.g. the waiter hasn't polled yet).
    pub fn wake(&self) {
        if let Some(waker) = self.waker.lock().take() {
            waker.wake();
        }
    }

    /// Marks the cell permanently closed and wakes whoever is registered,
    /// used to signal "the other side is gone" (e.g. a dropped `Promise`).
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.wake();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for WaitCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as StdOrdering};
    use std::sync::Arc;

    #[test]
    fn wakes_the_registered_waker() {
        let cell = WaitCell::new();
        let woken = Arc::new(AtomicUsize::new(0));
        let woken2 = woken.clone();
        let waker = futures_test_waker(move || {
            woken2.fetch_add(1, StdOrdering::SeqCst);
        });
        cell.register(&waker);
        cell.wake();
        assert_eq!(woken.load(StdOrdering::SeqCst), 1);
    }

    #[test]
    fn close_wakes_and_marks_closed() {
        let cell = WaitCell::new();
        assert!(!cell.is_closed());
        let woken = Arc::new(AtomicUsize::new(0));
        let woken2 = woken.clone();
        let waker = futures_test_waker(move || {
            woken2.fetch_add(1, StdOrdering::SeqCst);
        });
        cell.register(&waker);
        cell.close();
        assert!(cell.is_closed());
        assert_eq!(woken.load(StdOrdering::SeqCst), 1);
    }

    // A minimal `Waker` built from a plain closure, for tests only.
    fn futures_test_waker(f: impl Fn() + Send + Sync + 'static) -> Waker {
        struct W<F>(F);
        impl<F: Fn() + Send + Sync + 'static> std::task::Wake for W<F> {
            fn wake(self: Arc<Self>) {
                (self.0)()
            }
            fn wake_by_ref(self: &Arc<Self>) {
                (self.0)()
            }
        }
        Waker::from(Arc::new(W(f)))
    }
}
