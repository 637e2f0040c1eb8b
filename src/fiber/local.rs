// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Fiber-local storage (spec §6): storage that is private to a single
//! fiber and is torn down (in `Drop` order) exactly once, when the fiber
//! stops, mirroring how `std::thread::LocalKey` behaves for OS threads.

use crate::loom::sync::atomic::{AtomicUsize, Ordering};
use std::any::Any;
use std::collections::HashMap;

static NEXT_KEY: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
pub struct FlsMap {
    slots: HashMap<usize, Box<dyn Any + Send>>,
}

impl FlsMap {
    pub(crate) fn run_all_cleanups(&mut self) {
        // Dropping each boxed value runs `T`'s destructor; order is
        // unspecified, matching `thread_local!`'s own documented contract.
        self.slots.clear();
    }
}

/// A piece of per-fiber storage, initialized lazily on first access by the
/// owning fiber and dropped when that fiber stops.
///
/// # Panics
/// Every accessor panics if called from outside a fiber (i.e. directly on
/// a worker thread that isn't presently driving one, or on a thread that
/// never entered the runtime at all).
pub struct FiberLocal<T: Send + 'static> {
    key: usize,
    init: fn() -> T,
}

impl<T: Send + 'static> FiberLocal<T> {
    pub const fn new(init: fn() -> T) -> Self {
        // `key` is assigned lazily on first use because `AtomicUsize`
        // fetch_add isn't available in a const fn; see `key()` below.
        Self { key: usize::MAX, init }
    }

    fn key(&self) -> usize {
        // Each `FiberLocal` is normally a `static`, so its address is a
        // perfectly good stable identity — avoids needing a separate
        // lazily-initialized id and matches how `thread_local!` keys off
        // the static's own storage.
        self as *const Self as usize
    }

    /// Runs `f` with a reference to this fiber's instance, initializing it
    /// via the constructor passed to [`FiberLocal::new`] if this is the
    /// first access from the current fiber.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let fiber = crate::fiber::current().expect("FiberLocal accessed outside of a fiber");
        let mut fls = fiber.fls().lock();
        let key = self.key();
        if !fls.slots.contains_key(&key) {
            let value: Box<dyn Any + Send> = Box::new((self.init)());
            fls.slots.insert(key, value);
        }
        let value = fls
            .slots
            .get(&key)
            .and_then(|b| b.downcast_ref::<T>())
            .expect("FiberLocal slot type mismatch");
        f(value)
    }
}

unsafe impl<T: Send + 'static> Sync for FiberLocal<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Scheduler, SchedulerConfig};
    use std::sync::atomic::{AtomicUsize as StdAtomicUsize, Ordering as StdOrdering};
    use std::sync::Arc;

    static COUNTER: FiberLocal<StdAtomicUsize> = FiberLocal::new(|| StdAtomicUsize::new(0));

    #[test]
    fn is_private_to_each_fiber() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 2,
            ..Default::default()
        });
        let (tx, rx) = std::sync::mpsc::channel();
        for _ in 0..2 {
            let tx = tx.clone();
            scheduler
                .spawn(async move {
                    COUNTER.with(|c| c.fetch_add(1, StdOrdering::SeqCst));
                    let seen = COUNTER.with(|c| c.load(StdOrdering::SeqCst));
                    let _ = tx.send(seen);
                    Ok::<(), crate::error::FiberError>(())
                })
                .detach();
        }
        let mut results: Vec<_> = (0..2).map(|_| rx.recv().unwrap()).collect();
        results.sort_unstable();
        assert_eq!(results, vec![1, 1]);
        let _ = Arc::new(scheduler); // keep alive until fibers drain
    }
}
