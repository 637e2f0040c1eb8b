// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Serial execution contexts.
//!
//! A [`Strand`] is a FIFO queue of callables that is drained by at most one
//! worker thread at a time, giving every fiber bound to it a total order
//! over its completions (spec §3, §5 ordering guarantee (a)). This is the
//! same non-blocking "drain-or-hand-off" trick `asio::strand` uses: posting
//! a job either starts a drain (if none is running) or is picked up by the
//! drain already in flight, so `post` never blocks the caller and never
//! runs two jobs from the same strand concurrently.

use crate::loom::sync::atomic::{AtomicBool, Ordering};
use crate::spinlock::Spinlock;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run a boxed closure on one of the runtime's worker
/// threads. Implemented by [`crate::scheduler::Scheduler`].
pub trait RawExecutor: Send + Sync {
    /// Schedules `job` to run on some worker thread, at some point after
    /// this call returns.
    fn execute(&self, job: Job);
}

std::thread_local! {
    /// Stack of strands the current OS thread is presently draining,
    /// innermost last. Used by [`Strand::dispatch`] to detect the fast
    /// path where the caller is already serialized against the target.
    static CURRENT: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

struct Inner {
    executor: Arc<dyn RawExecutor>,
    queue: Spinlock<VecDeque<Job>>,
    scheduled: AtomicBool,
}

/// A serial execution context: all callables posted to a given `Strand`
/// run one at a time, in posting order, never concurrently with each
/// other (though possibly on different worker threads over time).
#[derive(Clone)]
pub struct Strand {
    inner: Arc<Inner>,
}

impl Strand {
    /// Creates a new strand that schedules its drain loop via `executor`.
    pub fn new(executor: Arc<dyn RawExecutor>) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                queue: Spinlock::new(VecDeque::new()),
                scheduled: AtomicBool::new(false),
            }),
        }
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// Returns `true` if the calling OS thread is currently draining this
    /// strand (i.e. is executing a callable that was posted to it).
    pub fn is_current(&self) -> bool {
        let addr = self.addr();
        CURRENT.with(|stack| stack.borrow().last().copied() == Some(addr))
    }

    /// Enqueues `f`, always deferring its execution to a (possibly
    /// different) worker thread drain, never running it inline.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.queue.lock().push_back(Box::new(f));
        self.try_schedule();
    }

    /// Runs `f` inline if the caller is already draining this strand,
    /// otherwise behaves exactly like [`Strand::post`].
    pub fn dispatch<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_current() {
            f();
        } else {
            self.post(f);
        }
    }

    fn try_schedule(&self) {
        if self
            .inner
            .scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let this = self.clone();
            self.inner.executor.execute(Box::new(move || this.drain()));
        }
    }

    fn drain(&self) {
        let addr = self.addr();
        CURRENT.with(|stack| stack.borrow_mut().push(addr));
        loop {
            let job = self.inner.queue.lock().pop_front();
            match job {
                Some(job) => job(),
                None => {
                    // Nothing left as of a moment ago. Release the
                    // "scheduled" flag, then re-check: a racing `post`
                    // may have pushed a new job right after we observed
                    // an empty queue but before we cleared the flag.
                    self.inner.scheduled.store(false, Ordering::Release);
                    let more = !self.inner.queue.lock().is_empty();
                    if more
                        && self
                            .inner
                            .scheduled
                            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                    {
                        continue;
                    }
                    break;
                }
            }
        }
        CURRENT.with(|stack| {
            debug_assert_eq!(stack.borrow().last().copied(), Some(addr));
            stack.borrow_mut().pop();
        });
    }
}

impl PartialEq for Strand {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
impl Eq for Strand {}

impl core::fmt::Debug for Strand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Strand").field("addr", &self.addr()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    struct InlineExecutor;
    impl RawExecutor for InlineExecutor {
        fn execute(&self, job: Job) {
            std::thread::spawn(job);
        }
    }

    #[test]
    fn preserves_fifo_order() {
        let strand = Strand::new(Arc::new(InlineExecutor));
        let observed = Arc::new(StdMutex::new(Vec::new()));
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        for i in 0..50 {
            let observed = observed.clone();
            let done_tx = done_tx.clone();
            strand.post(move || {
                observed.lock().unwrap().push(i);
                let _ = done_tx.send(());
            });
        }
        for _ in 0..50 {
            done_rx.recv().unwrap();
        }
        let observed = observed.lock().unwrap();
        let expected: Vec<usize> = (0..50).collect();
        assert_eq!(*observed, expected);
    }

    #[test]
    fn dispatch_runs_inline_when_current() {
        let strand = Strand::new(Arc::new(InlineExecutor));
        let ran_inline = Arc::new(AtomicUsize::new(0));
        let ran_inline2 = ran_inline.clone();
        let s2 = strand.clone();
        strand.post(move || {
            assert!(s2.is_current());
            s2.dispatch(move || {
                ran_inline2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            });
            // The nested dispatch must have already run by the time
            // `dispatch` returns, since it took the inline path.
            assert_eq!(ran_inline2.load(std::sync::atomic::Ordering::SeqCst), 1);
        });
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(ran_inline.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
