// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The future/promise/packaged-task family (spec §4.6): how a value
//! produced by one fiber (or computed on a foreign thread pool, see
//! [`crate::executor`]) is handed to another without blocking a whole OS
//! thread on the handoff.

pub mod compose;
pub mod packaged_task;
pub(crate) mod promise;
pub mod shared_future;

pub use compose::{async_wait_for_all, async_wait_for_any, wait_for_all, wait_for_any};
pub use packaged_task::PackagedTask;
pub use promise::{make_ready_future, Future, Promise};
pub use shared_future::SharedFuture;
