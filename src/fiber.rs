// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The fiber object (spec §3, §4.1): a lightweight thread represented as a
//! pinned `Future` state machine rather than a hand-switched stack (see
//! the rationale in `SPEC_FULL.md` §9). Each suspension point inside a
//! fiber is simply an `.await` on a primitive (`Mutex::lock`, `CondVar::wait`,
//! `sleep`, `Future::get`, ...) whose own `poll` implementation registers a
//! [`std::task::Waker`] and returns `Pending`; resuming the fiber is
//! nothing more than invoking that waker, which — because every fiber's
//! waker always posts through its [`Strand`] — reduces to "post a re-poll
//! job", giving the per-fiber FIFO ordering the spec requires.

pub mod local;

use crate::error::{FiberError, FiberId};
use crate::loom::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use crate::scheduler::Scheduler;
use crate::strand::Strand;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll, Wake, Waker};

use local::FlsMap;

static_assertions::assert_impl_all!(JoinHandle<()>: Send);
static_assertions::assert_impl_all!(FiberInner: Send, Sync);

/// Observable lifecycle state of a fiber (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FiberState {
    Ready = 0,
    Running = 1,
    Blocked = 2,
    Stopped = 3,
}

impl FiberState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::Blocked,
            _ => Self::Stopped,
        }
    }
}

type Cleanup = Box<dyn FnOnce() + Send>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// The type-erased, shared state of a spawned fiber. Cheap to clone (an
/// `Arc` bump); this is what a [`std::task::Waker`] wakes and what
/// `this_fiber::*` free functions read off the thread-local "current fiber".
pub struct FiberInner {
    id: FiberId,
    state: AtomicU8,
    strand: Strand,
    scheduler: Arc<Scheduler>,
    disable_level: AtomicU32,
    interrupt_requested: AtomicBool,
    fls: crate::spinlock::Spinlock<FlsMap>,
    join_queue: crate::spinlock::Spinlock<Vec<Cleanup>>,
    cleanup_queue: crate::spinlock::Spinlock<Vec<Cleanup>>,
    uncaught: crate::spinlock::Spinlock<Option<FiberError>>,
    output: crate::spinlock::Spinlock<Option<Box<dyn Any + Send>>>,
    this_ref: crate::spinlock::Spinlock<Option<Arc<FiberInner>>>,
    name: crate::spinlock::Spinlock<Option<String>>,
    poll_fn: crate::spinlock::Spinlock<Option<Box<dyn FnMut(&mut Context<'_>) -> bool + Send>>>,
}

std::thread_local! {
    static CURRENT_FIBER: std::cell::RefCell<Option<Arc<FiberInner>>> =
        const { std::cell::RefCell::new(None) };
}

impl FiberInner {
    pub fn id(&self) -> FiberId {
        self.id
    }

    pub fn state(&self) -> FiberState {
        FiberState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn strand(&self) -> &Strand {
        &self.strand
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn name(&self) -> Option<String> {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock() = Some(name.into());
    }

    /// Registers a callback to run (in registration order) right before
    /// this fiber's join queue runs, i.e. immediately after it stops.
    pub fn at_exit(&self, f: impl FnOnce() + Send + 'static) {
        self.cleanup_queue.lock().push(Box::new(f));
    }

    /// Registers `f` to run once this fiber reaches `Stopped`. Runs
    /// immediately (on the calling thread) if it already has.
    pub fn on_join(self: &Arc<Self>, f: impl FnOnce() + Send + 'static) {
        if self.state() == FiberState::Stopped {
            f();
            return;
        }
        let mut queue = self.join_queue.lock();
        // Re-check under the lock: the fiber may have stopped between the
        // fast-path check above and acquiring the spinlock.
        if self.state() == FiberState::Stopped {
            drop(queue);
            f();
        } else {
            queue.push(Box::new(f));
        }
    }

    /// Sets the pending-interrupt flag, unless interruption is currently
    /// disabled (spec §4.1, §5).
    pub fn interrupt(&self) {
        if self.disable_level.load(Ordering::Acquire) == 0 {
            self.interrupt_requested.store(true, Ordering::Release);
        }
    }

    /// The corrected semantics (see `SPEC_FULL.md` §9 Design Notes): `true`
    /// once `interrupt()` has taken effect, not its historical inverse.
    pub fn interruption_requested(&self) -> bool {
        self.interrupt_requested.load(Ordering::Acquire)
    }

    pub fn interruption_enabled(&self) -> bool {
        self.disable_level.load(Ordering::Acquire) == 0
    }

    /// Checked at every suspension point. Returns `Err` exactly when an
    /// interrupt is pending and not currently disabled.
    pub fn interruption_point(&self) -> Result<(), FiberError> {
        if self.interruption_enabled() && self.interruption_requested() {
            Err(FiberError::Interrupted)
        } else {
            Ok(())
        }
    }

    pub(crate) fn enter_disable_interruption(&self) {
        self.disable_level.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn exit_disable_interruption(&self) {
        self.disable_level.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn fls(&self) -> &crate::spinlock::Spinlock<FlsMap> {
        &self.fls
    }

    /// Posts a re-poll of this fiber onto its strand; the general,
    /// always-deferred "resume" path (spec §4.1 `resume()`).
    pub fn resume(self: &Arc<Self>) {
        let me = self.clone();
        self.strand.post(move || me.poll_once());
    }

    /// Like [`FiberInner::resume`] but runs inline if the caller is
    /// already draining this fiber's strand (`activate()` in spec §4.1).
    pub fn activate(self: &Arc<Self>) {
        let me = self.clone();
        self.strand.dispatch(move || me.poll_once());
    }

    fn poll_once(self: Arc<Self>) {
        if self.state() == FiberState::Stopped {
            return;
        }
        self.state.store(FiberState::Running as u8, Ordering::Release);
        CURRENT_FIBER.with(|cur| *cur.borrow_mut() = Some(self.clone()));

        let waker = Waker::from(self.clone());
        let mut cx = Context::from_waker(&waker);
        let mut poll_fn = self.poll_fn.lock().take();
        let finished = match &mut poll_fn {
            Some(f) => {
                match std::panic::catch_unwind(AssertUnwindSafe(|| f(&mut cx))) {
                    Ok(done) => done,
                    Err(payload) => {
                        *self.uncaught.lock() = Some(FiberError::Invariant(panic_message(&payload)));
                        true
                    }
                }
            }
            None => true,
        };

        CURRENT_FIBER.with(|cur| *cur.borrow_mut() = None);

        if finished {
            self.terminate();
        } else {
            *self.poll_fn.lock() = poll_fn;
            self.state.store(FiberState::Blocked as u8, Ordering::Release);
        }
    }

    fn terminate(self: &Arc<Self>) {
        // Entry closure (captured inside `poll_fn`) is already dropped by
        // the time we get here, satisfying "entry closure destroyed
        // before the Stopped transition is observed by joiners".
        self.state.store(FiberState::Stopped as u8, Ordering::Release);
        self.scheduler.on_fiber_exit();

        let cleanups: Vec<Cleanup> = std::mem::take(&mut self.cleanup_queue.lock());
        for cleanup in cleanups {
            cleanup();
        }
        self.fls.lock().run_all_cleanups();

        let joiners: Vec<Cleanup> = std::mem::take(&mut self.join_queue.lock());
        for joiner in joiners {
            joiner();
        }

        *self.this_ref.lock() = None;
    }

    fn take_uncaught(&self) -> Option<FiberError> {
        self.uncaught.lock().take()
    }

    fn take_output<T: Send + 'static>(&self) -> Option<T> {
        self.output
            .lock()
            .take()
            .and_then(|b| b.downcast::<T>().ok())
            .map(|b| *b)
    }
}

impl Wake for FiberInner {
    fn wake(self: Arc<Self>) {
        self.resume();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.resume();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &'static str {
    if payload.downcast_ref::<&str>().is_some() || payload.downcast_ref::<String>().is_some() {
        "fiber entry panicked"
    } else {
        "fiber entry panicked with a non-string payload"
    }
}

/// A handle returned by [`crate::scheduler::Scheduler::spawn`].
///
/// Dropping a `JoinHandle` without calling `detach` keeps the fiber's
/// lifetime tied to the handle only insofar as the handle is how you
/// observe completion — the fiber keeps running to completion regardless,
/// matching the spec's "detach" being about *who is responsible for
/// observing the result*, not the fiber's own liveness.
pub struct JoinHandle<T> {
    inner: Arc<FiberInner>,
    _marker: std::marker::PhantomData<T>,
}

unsafe impl<T: Send> Send for JoinHandle<T> {}

impl<T: Send + 'static> JoinHandle<T> {
    pub fn id(&self) -> FiberId {
        self.inner.id()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.inner.set_name(name);
    }

    pub fn name(&self) -> Option<String> {
        self.inner.name()
    }

    pub fn is_joinable(&self) -> bool {
        self.inner.state() != FiberState::Stopped
    }

    /// Requests interruption of the fiber (spec §4.1, §5).
    pub fn interrupt(&self) {
        self.inner.interrupt();
    }

    /// Detaches the fiber: the runtime keeps it alive via a self-owning
    /// reference until it stops, and the caller no longer needs to join.
    pub fn detach(self) {
        *self.inner.this_ref.lock() = Some(self.inner.clone());
    }

    /// Blocks the *calling fiber* until the target stops, discarding any
    /// captured error (spec §4.1 `join`, §7 "plain `join()` silently
    /// discards").
    ///
    /// # Errors
    /// Returns [`FiberError::Deadlock`] if called on the current fiber, or
    /// [`FiberError::Invariant`] if the target belongs to a different
    /// scheduler than the caller's (cross-scheduler join is rejected by
    /// design, see `SPEC_FULL.md` §9).
    pub async fn join(&self) -> Result<(), FiberError> {
        self.join_raw().await?;
        Ok(())
    }

    /// Like [`JoinHandle::join`] but returns the target's result,
    /// propagating its captured error to the caller.
    pub async fn join_and_rethrow(&self) -> Result<T, FiberError> {
        self.join_raw().await?;
        if let Some(err) = self.inner.take_uncaught() {
            return Err(err);
        }
        self.inner
            .take_output::<T>()
            .ok_or(FiberError::Invariant("joined fiber produced no output"))
    }

    /// Blocks the *calling OS thread* (not a fiber) until the target
    /// stops, then returns its result. Used by [`crate::scheduler::greenify`]
    /// to bridge a program's real `main` thread into the fiber runtime.
    ///
    /// # Panics
    /// Panics if called from within a fiber; use [`JoinHandle::join_and_rethrow`]
    /// there instead.
    pub fn block_on_and_rethrow(&self) -> Result<T, FiberError> {
        assert!(
            self::current().is_none(),
            "block_on_and_rethrow called from within a fiber; use join_and_rethrow instead"
        );
        let pair = Arc::new((StdMutex::new(false), std::sync::Condvar::new()));
        let pair2 = pair.clone();
        self.inner.on_join(move || {
            let (lock, cvar) = &*pair2;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        });
        let (lock, cvar) = &*pair;
        let mut done = lock.lock().unwrap();
        while !*done {
            done = cvar.wait(done).unwrap();
        }
        drop(done);
        if let Some(err) = self.inner.take_uncaught() {
            return Err(err);
        }
        self.inner
            .take_output::<T>()
            .ok_or(FiberError::Invariant("joined fiber produced no output"))
    }

    async fn join_raw(&self) -> Result<(), FiberError> {
        let current = self::current();
        if let Some(current) = &current {
            if Arc::ptr_eq(current, &self.inner) {
                return Err(FiberError::Deadlock("a fiber cannot join itself"));
            }
            if !Arc::ptr_eq(current.scheduler(), self.inner.scheduler()) {
                return Err(FiberError::Invariant(
                    "cannot join a fiber owned by a different scheduler",
                ));
            }
        }
        JoinFuture {
            inner: self.inner.clone(),
            registered: false,
        }
        .await;
        Ok(())
    }
}

struct JoinFuture {
    inner: Arc<FiberInner>,
    registered: bool,
}

impl Future for JoinFuture {
    type Output = ();
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.inner.state() == FiberState::Stopped {
            return Poll::Ready(());
        }
        if !this.registered {
            this.registered = true;
            let waker = cx.waker().clone();
            this.inner.on_join(move || waker.wake());
        }
        Poll::Pending
    }
}

/// Spawns `entry` as a new fiber bound to `strand` (or a fresh private
/// strand if `None`), wrapping its `Result` output for retrieval by
/// [`JoinHandle::join_and_rethrow`].
pub(crate) fn spawn<F, T>(
    scheduler: Arc<Scheduler>,
    strand: Option<Strand>,
    entry: F,
) -> JoinHandle<T>
where
    F: Future<Output = Result<T, FiberError>> + Send + 'static,
    T: Send + 'static,
{
    let strand = strand.unwrap_or_else(|| Strand::new(scheduler.clone() as Arc<dyn crate::strand::RawExecutor>));
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);

    let inner = Arc::new(FiberInner {
        id,
        state: AtomicU8::new(FiberState::Ready as u8),
        strand,
        scheduler,
        disable_level: AtomicU32::new(0),
        interrupt_requested: AtomicBool::new(false),
        fls: crate::spinlock::Spinlock::new(FlsMap::default()),
        join_queue: crate::spinlock::Spinlock::new(Vec::new()),
        cleanup_queue: crate::spinlock::Spinlock::new(Vec::new()),
        uncaught: crate::spinlock::Spinlock::new(None),
        output: crate::spinlock::Spinlock::new(None),
        this_ref: crate::spinlock::Spinlock::new(None),
        name: crate::spinlock::Spinlock::new(None),
        poll_fn: crate::spinlock::Spinlock::new(None),
    });

    let output_slot = inner.clone();
    let uncaught_slot = inner.clone();
    let mut fut = Box::pin(entry);
    let poll_fn = move |cx: &mut Context<'_>| -> bool {
        match fut.as_mut().poll(cx) {
            Poll::Ready(Ok(value)) => {
                *output_slot.output.lock() = Some(Box::new(value));
                true
            }
            Poll::Ready(Err(err)) => {
                *uncaught_slot.uncaught.lock() = Some(err);
                true
            }
            Poll::Pending => false,
        }
    };
    *inner.poll_fn.lock() = Some(Box::new(poll_fn));

    inner.scheduler.on_fiber_spawned();
    inner.resume();

    JoinHandle {
        inner,
        _marker: std::marker::PhantomData,
    }
}

/// Returns the fiber currently executing on this OS thread, if any.
pub fn current() -> Option<Arc<FiberInner>> {
    CURRENT_FIBER.with(|cur| cur.borrow().clone())
}

/// `true` if the calling OS thread is presently driving a fiber.
pub fn is_a_fiber() -> bool {
    current().is_some()
}

static LIVE_WORKER_HINT: AtomicUsize = AtomicUsize::new(1);
pub(crate) fn set_worker_hint(n: usize) {
    LIVE_WORKER_HINT.store(n.max(1), Ordering::Relaxed);
}
pub(crate) fn worker_hint() -> usize {
    LIVE_WORKER_HINT.load(Ordering::Relaxed)
}

#[allow(dead_code)]
fn _assert_send_sync()
where
    FiberInner: Send + Sync,
{
}

#[allow(dead_code)]
type BoxedDynScheduler = Arc<StdMutex<()>>; // placeholder to keep StdMutex import used in doc examples
