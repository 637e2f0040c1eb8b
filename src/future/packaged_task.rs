// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `PackagedTask` (spec §4.6): wraps a plain closure together with a
//! [`Promise`], so invoking it once routes its return value (or a
//! captured panic) into the matching [`Future`] instead of the caller's
//! return path.

use super::promise::{Future, Promise};
use crate::error::FiberError;
use std::panic::AssertUnwindSafe;

/// A callable bound to a promise: calling it exactly once satisfies the
/// promise with its result.
pub struct PackagedTask<T> {
    task: Option<Box<dyn FnOnce() -> Result<T, FiberError> + Send>>,
    promise: Promise<T>,
}

impl<T: Send + 'static> PackagedTask<T> {
    pub fn new(f: impl FnOnce() -> Result<T, FiberError> + Send + 'static) -> Self {
        Self {
            task: Some(Box::new(f)),
            promise: Promise::new(),
        }
    }

    /// Returns the associated future. See [`Promise::get_future`] for the
    /// single-retrieval rule this inherits.
    pub fn get_future(&self) -> Result<Future<T>, FiberError> {
        self.promise.get_future()
    }

    /// Runs the wrapped closure and satisfies the promise with its
    /// outcome. A panic inside the closure is caught and delivered to the
    /// future as [`FiberError::Invariant`] rather than unwinding through
    /// whatever called `invoke`.
    ///
    /// No-op if the task was already invoked (or this instance was
    /// default-constructed with no task).
    pub fn invoke(mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(task));
        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(FiberError::Invariant("packaged_task closure panicked")),
        };
        let _ = match result {
            Ok(value) => self.promise.set_value(value),
            Err(err) => self.promise.set_exception(err),
        };
    }
}
