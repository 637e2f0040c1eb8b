// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A reusable rendezvous point for a fixed number of fibers (spec §4.5),
//! grounded on the teacher's spin-based `Barrier`/`BarrierState` (the
//! `count`/`generation_id` pair and the "last arriver runs the completion,
//! then bumps the generation to release everyone else" shape are carried
//! over directly), extended here with the same
//! register-a-waker-then-suspend pattern every other primitive in this
//! module uses instead of the teacher's busy-spin.
//!
//! The completion function, if any, returns the threshold for the *next*
//! generation (which must be nonzero) rather than just running a side
//! effect — this lets a barrier's participant count change between
//! cycles, matching the distilled spec's completion-function contract.

use crate::error::{FiberError, FiberId};
use crate::fiber;
use crate::spinlock::Spinlock;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

struct Entry {
    generation: u64,
    id: FiberId,
    waker: Waker,
}

struct State {
    waiting: usize,
    threshold: usize,
    generation: u64,
    wakers: VecDeque<Entry>,
}

/// Outcome of [`Barrier::wait`]: exactly one arriver per generation sees
/// `is_leader() == true`, useful for running cleanup/setup work once per
/// cycle without a separate completion closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    leader: bool,
}

impl BarrierWaitResult {
    pub fn is_leader(self) -> bool {
        self.leader
    }
}

/// A barrier for a fixed number of fibers, reusable across generations.
pub struct Barrier {
    initial_count: usize,
    completion: Option<Box<dyn Fn() -> usize + Send + Sync>>,
    state: Spinlock<State>,
}

impl Barrier {
    /// Creates a barrier for `count` fibers.
    ///
    /// # Errors
    /// [`FiberError::Invariant`] if `count` is zero.
    pub fn new(count: usize) -> Result<Self, FiberError> {
        Self::with_completion(count, None::<fn() -> usize>)
    }

    /// Like [`Barrier::new`], but `completion` runs once per generation on
    /// the fiber that arrives last, before the others are released; its
    /// return value becomes the threshold for the next generation (which
    /// must be nonzero).
    pub fn with_completion(
        count: usize,
        completion: Option<impl Fn() -> usize + Send + Sync + 'static>,
    ) -> Result<Self, FiberError> {
        if count == 0 {
            return Err(FiberError::Invariant("barrier count must be at least 1"));
        }
        Ok(Self {
            initial_count: count,
            completion: completion.map(|f| Box::new(f) as Box<dyn Fn() -> usize + Send + Sync>),
            state: Spinlock::new(State {
                waiting: 0,
                threshold: count,
                generation: 0,
                wakers: VecDeque::new(),
            }),
        })
    }

    pub fn count(&self) -> usize {
        self.initial_count
    }

    /// Suspends the calling fiber until enough fibers have called `wait`
    /// on this generation to reach the current threshold, then releases
    /// all of them together.
    pub fn wait(&self) -> BarrierWait<'_> {
        BarrierWait {
            barrier: self,
            state: BarrierWaitState::Start,
        }
    }
}

enum BarrierWaitState {
    Start,
    Waiting { generation: u64, id: FiberId },
}

pub struct BarrierWait<'a> {
    barrier: &'a Barrier,
    state: BarrierWaitState,
}

impl Future for BarrierWait<'_> {
    type Output = Result<BarrierWaitResult, FiberError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let id = match fiber::current() {
            Some(f) => f.id(),
            None => return Poll::Ready(Err(FiberError::Invariant("barrier used outside of a fiber"))),
        };

        match this.state {
            BarrierWaitState::Start => {
                let mut st = this.barrier.state.lock();
                let generation = st.generation;
                st.waiting += 1;
                if st.waiting == st.threshold {
                    let next_threshold = match &this.barrier.completion {
                        Some(completion) => completion(),
                        None => this.barrier.initial_count,
                    };
                    assert_ne!(next_threshold, 0, "barrier completion function returned zero");
                    st.waiting = 0;
                    st.threshold = next_threshold;
                    st.generation = st.generation.wrapping_add(1);
                    let wakers: Vec<Entry> = st.wakers.drain(..).collect();
                    drop(st);
                    for entry in wakers {
                        entry.waker.wake();
                    }
                    return Poll::Ready(Ok(BarrierWaitResult { leader: true }));
                }
                st.wakers.push_back(Entry {
                    generation,
                    id,
                    waker: cx.waker().clone(),
                });
                drop(st);
                this.state = BarrierWaitState::Waiting { generation, id };
                Poll::Pending
            }
            BarrierWaitState::Waiting { generation, id } => {
                if let Some(fiber) = fiber::current() {
                    if let Err(e) = fiber.interruption_point() {
                        let mut st = this.barrier.state.lock();
                        if st.generation == generation {
                            if let Some(pos) = st.wakers.iter().position(|e| e.id == id) {
                                st.wakers.remove(pos);
                                st.waiting -= 1;
                            }
                        }
                        return Poll::Ready(Err(e));
                    }
                }
                let st = this.barrier.state.lock();
                if st.generation != generation {
                    return Poll::Ready(Ok(BarrierWaitResult { leader: false }));
                }
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Scheduler, SchedulerConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn releases_all_waiters_together() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 4,
            ..Default::default()
        });
        let completions = Arc::new(AtomicUsize::new(0));
        let completions2 = completions.clone();
        let barrier = Arc::new(
            Barrier::with_completion(4, Some(move || {
                completions2.fetch_add(1, Ordering::SeqCst);
                4
            }))
            .unwrap(),
        );
        let leaders = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = std::sync::mpsc::channel();
        for _ in 0..4 {
            let barrier = barrier.clone();
            let leaders = leaders.clone();
            let tx = tx.clone();
            scheduler
                .spawn(async move {
                    let result = barrier.wait().await?;
                    if result.is_leader() {
                        leaders.fetch_add(1, Ordering::SeqCst);
                    }
                    let _ = tx.send(());
                    Ok::<(), FiberError>(())
                })
                .detach();
        }
        for _ in 0..4 {
            rx.recv().unwrap();
        }
        assert_eq!(leaders.load(Ordering::SeqCst), 1);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        scheduler.shutdown();
        scheduler.join_workers();
    }
}
