// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Short-duration critical sections protecting runtime-internal state.
//!
//! Every wait queue in this crate (mutex, condvar, barrier, future shared
//! state, strand mailbox) is guarded by one of these. The discipline is
//! always: lock, mutate a plain data structure, unlock *before* parking —
//! never hold a [`Spinlock`] across a suspension point (spec §5, §9).
//!
//! Implemented as a thin, named wrapper over [`spin::Mutex`] (the teacher's
//! own choice for exactly this kind of critical section, see
//! `libs/sync::RawMutex` and `libs/async-exec`'s direct `spin` dependency)
//! rather than reinventing the compare-and-swap loop.

use spin::{Mutex, MutexGuard};

/// A short, spin-based mutual exclusion lock.
///
/// Unlike [`crate::sync::Mutex`], this type never parks a fiber: a thread
/// contending on it simply spins. It exists purely to protect small,
/// quickly-mutated internal structures (wait queues, shared state) across
/// OS worker threads.
#[derive(Debug, Default)]
pub struct Spinlock<T> {
    inner: Mutex<T>,
}

impl<T> Spinlock<T> {
    /// Creates a new spinlock wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquires the lock, spinning until it becomes available.
    ///
    /// The returned guard must be dropped before the calling fiber parks;
    /// holding it across a suspension point would deadlock any other
    /// worker thread that needs the same lock to make progress.
    #[inline]
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        self.inner.lock()
    }

    /// Attempts to acquire the lock without spinning.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        self.inner.try_lock()
    }

    /// Consumes the spinlock, returning the wrapped value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

pub type SpinlockGuard<'a, T> = MutexGuard<'a, T>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn excludes_concurrent_writers() {
        let lock = Arc::new(Spinlock::new(0_u64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 8000);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = Spinlock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }
}
