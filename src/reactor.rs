// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The in-crate stand-in for the spec's "external reactor" collaborator.
//!
//! Per spec §1 the core only needs a reactor that can `run`/`stop`, post
//! work onto strands, and arm/cancel one-shot timers; this module provides
//! exactly that and nothing more (no socket or file I/O). Timers are kept
//! in a simple binary heap rather than the teacher's intrusive timer wheel
//! (`time::timer::Entry`) — the wheel earns its complexity at a scale
//! (thousands of timers, O(1) insert) this crate's fiber runtime doesn't
//! need, and a `BinaryHeap` is much easier to verify by inspection.

use crate::loom::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use crate::spinlock::Spinlock;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a timer's callback is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// The deadline was reached.
    Fired,
    /// [`TimerHandle::cancel`] was called before the deadline.
    Cancelled,
}

type Callback = Box<dyn FnOnce(TimerOutcome) + Send + 'static>;

struct TimerState {
    callback: Spinlock<Option<Callback>>,
}

struct Entry {
    deadline: Instant,
    seq: u64,
    state: Arc<TimerState>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for Entry {}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed so `BinaryHeap` (a max-heap) pops the earliest deadline.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// A handle to an armed timer, allowing cancellation before it fires.
pub struct TimerHandle {
    state: Arc<TimerState>,
}

impl TimerHandle {
    /// Cancels the timer if it has not already fired.
    ///
    /// If still pending, its callback runs synchronously on the calling
    /// thread with [`TimerOutcome::Cancelled`] before this call returns —
    /// this is what lets a mutex's timeout-cancellation handler resume the
    /// new owner inline (spec §4.3).
    pub fn cancel(&self) {
        if let Some(cb) = self.state.callback.lock().take() {
            cb(TimerOutcome::Cancelled);
        }
    }
}

/// The minimal async I/O reactor the fiber runtime is built on.
pub struct Reactor {
    timers: Spinlock<BinaryHeap<Entry>>,
    next_seq: AtomicU64,
    stopped: AtomicBool,
}

impl Reactor {
    pub fn new() -> Self {
        Self {
            timers: Spinlock::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// Arms a one-shot timer that invokes `callback` at or after `deadline`,
    /// unless cancelled first.
    pub fn arm_at<F>(&self, deadline: Instant, callback: F) -> TimerHandle
    where
        F: FnOnce(TimerOutcome) + Send + 'static,
    {
        let state = Arc::new(TimerState {
            callback: Spinlock::new(Some(Box::new(callback) as Callback)),
        });
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.timers.lock().push(Entry {
            deadline,
            seq,
            state: state.clone(),
        });
        TimerHandle { state }
    }

    /// Convenience over [`Reactor::arm_at`] for a relative duration.
    pub fn arm_after<F>(&self, duration: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce(TimerOutcome) + Send + 'static,
    {
        self.arm_at(Instant::now() + duration, callback)
    }

    /// Fires every timer whose deadline is `<= now`, and returns the
    /// earliest remaining deadline (if any), so the caller knows how long
    /// it can safely park for.
    pub fn poll_timers(&self, now: Instant) -> Option<Instant> {
        loop {
            let due = {
                let mut timers = self.timers.lock();
                match timers.peek() {
                    Some(top) if top.deadline <= now => timers.pop(),
                    _ => return timers.peek().map(|e| e.deadline),
                }
            };
            let Some(entry) = due else { return None };
            if let Some(cb) = entry.state.callback.lock().take() {
                cb(TimerOutcome::Fired);
            }
        }
    }

    /// Signals that the reactor should stop driving timers. Workers observe
    /// this via the scheduler's heartbeat, not directly.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn fires_due_timers_in_order() {
        let reactor = Reactor::new();
        let order = Arc::new(Spinlock::new(Vec::new()));
        let base = Instant::now();
        for i in [3, 1, 2] {
            let order = order.clone();
            reactor.arm_at(base + Duration::from_millis(i), move |outcome| {
                assert_eq!(outcome, TimerOutcome::Fired);
                order.lock().push(i);
            });
        }
        std::thread::sleep(Duration::from_millis(10));
        let next = reactor.poll_timers(Instant::now());
        assert!(next.is_none());
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn cancel_before_fire_runs_cancelled_callback_once() {
        let reactor = Reactor::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let handle = reactor.arm_after(Duration::from_secs(10), move |outcome| {
            assert_eq!(outcome, TimerOutcome::Cancelled);
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();
        handle.cancel(); // no-op, already taken
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Firing later must not invoke the (already-cancelled) callback.
        reactor.poll_timers(Instant::now() + Duration::from_secs(20));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn returns_next_deadline_when_nothing_due() {
        let reactor = Reactor::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        reactor.arm_at(deadline, |_| {});
        let next = reactor.poll_timers(Instant::now());
        assert_eq!(next, Some(deadline));
    }
}
