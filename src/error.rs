// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The error taxonomy (spec §7).
//!
//! One enum per kind named in the spec rather than one type per primitive;
//! primitives that can fail in more than one way return [`FiberError`]
//! directly, and timeouts are reported as plain values
//! ([`CondVarStatus`], [`FutureStatus`], `bool`) rather than errors.

use thiserror::Error;

/// Unique identifier of a [`crate::fiber::Fiber`], stable for its lifetime.
pub type FiberId = u64;

/// Everything that can go wrong inside the fiber runtime.
#[derive(Debug, Error, Clone, Copy)]
pub enum FiberError {
    /// A [`crate::sync::CondVar`] was waited on with more than one
    /// distinct [`crate::sync::Mutex`] across its concurrent waiters.
    /// (Unlocking a mutex the caller doesn't own, the other case the spec
    /// groups under this error, can't happen here: a `MutexGuard` is only
    /// ever constructed for the fiber that acquired it.)
    #[error("permission denied: {0}")]
    Permission(&'static str),

    /// A plain mutex was relocked by its owner, or a fiber joined itself.
    #[error("deadlock: {0}")]
    Deadlock(&'static str),

    /// A suspension point observed a pending interrupt.
    #[error("fiber was interrupted")]
    Interrupted,

    /// An operation was invoked outside the context it requires (e.g.
    /// `this_fiber::id()` off a fiber), or given an invalid argument (a
    /// zero-sized barrier, a malformed duration).
    #[error("invalid: {0}")]
    Invariant(&'static str),

    /// A future/promise-family failure.
    #[error(transparent)]
    Future(#[from] FutureError),
}

/// Failures specific to the future/promise/packaged-task machinery.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FutureError {
    /// The last `Promise` was dropped without a value or exception set.
    #[error("broken promise")]
    BrokenPromise,
    /// `Future::get`/`into_value` was already called once on a non-shared future.
    #[error("future already retrieved")]
    FutureAlreadyRetrieved,
    /// `set_value`/`set_exception` was called twice on the same promise.
    #[error("promise already satisfied")]
    PromiseAlreadySatisfied,
    /// The future/promise has no associated shared state (default-constructed).
    #[error("future has no shared state")]
    NoState,
}

/// Result of a timed condition-variable wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondVarStatus {
    /// Woken by a `notify_*` call before the deadline.
    NoTimeout,
    /// The deadline elapsed first.
    Timeout,
}

/// Result of a timed future wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureStatus {
    /// The future became ready before the deadline.
    Ready,
    /// The deadline elapsed first.
    Timeout,
}

pub type Result<T> = core::result::Result<T, FiberError>;
