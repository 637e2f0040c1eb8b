// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A registry of idle workers, so the scheduler can wake exactly as many
//! as there is new work for (`unpark_one`) or all of them at once
//! (`unpark_all`, used at shutdown). Grounded on the teacher's
//! `ParkingLot<P>` used by `Executor`/`Worker`.

use crate::loom::sync::atomic::{AtomicUsize, Ordering};
use crate::park::Park;
use crate::spinlock::Spinlock;
use std::sync::Arc;

pub struct ParkingLot<P> {
    capacity: usize,
    parked: Spinlock<Vec<Arc<P>>>,
    num_parked: AtomicUsize,
}

impl<P: Park> ParkingLot<P> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            parked: Spinlock::new(Vec::with_capacity(capacity)),
            num_parked: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn num_parked(&self) -> usize {
        self.num_parked.load(Ordering::Acquire)
    }

    /// Registers `parker` as idle, then blocks the calling thread on it.
    /// Returns once the thread has been unparked.
    pub fn park(&self, parker: &Arc<P>) {
        self.parked.lock().push(parker.clone());
        self.num_parked.fetch_add(1, Ordering::AcqRel);
        parker.park();
    }

    /// Like [`ParkingLot::park`] but bounded: returns either once unparked
    /// or after `dur` elapses, whichever comes first. If the timeout fires
    /// first, removes `parker` from the idle registry itself so a later
    /// `unpark_one` doesn't wake a thread that already moved on.
    pub fn park_timeout(&self, parker: &Arc<P>, dur: core::time::Duration) {
        self.parked.lock().push(parker.clone());
        self.num_parked.fetch_add(1, Ordering::AcqRel);
        parker.park_timeout(dur);
        let mut parked = self.parked.lock();
        if let Some(pos) = parked.iter().position(|p| Arc::ptr_eq(p, parker)) {
            parked.remove(pos);
            self.num_parked.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Wakes a single idle worker, if any are parked.
    pub fn unpark_one(&self) {
        let victim = self.parked.lock().pop();
        if let Some(victim) = victim {
            self.num_parked.fetch_sub(1, Ordering::AcqRel);
            victim.unpark();
        }
    }

    /// Wakes every currently idle worker.
    pub fn unpark_all(&self) {
        let victims: Vec<_> = self.parked.lock().drain(..).collect();
        self.num_parked.fetch_sub(victims.len(), Ordering::AcqRel);
        for victim in victims {
            victim.unpark();
        }
    }
}
