// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A user-space cooperative threading runtime: "fibers" multiplexed over a
//! small pool of OS worker threads, with an in-crate reactor for timers and
//! a synchronization layer (mutex, condvar, barrier, future/promise) built
//! to suspend only the calling fiber, never the worker thread underneath it.
//!
//! A fiber is spawned with [`scheduler::Scheduler::spawn`] (or
//! [`scheduler::default_scheduler`] plus [`scheduler::greenify`] to bridge
//! in from a plain OS thread) and runs to completion cooperatively: it only
//! gives up its worker thread at an explicit suspension point — awaiting a
//! [`sync::Mutex`], a [`sync::CondVar`], a [`future::Future`], a sleep, or a
//! voluntary [`this_fiber::yield_now`] — never preemptively.
//!
//! ```no_run
//! use fiber_rt::scheduler::{Scheduler, SchedulerConfig};
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default());
//! let handle = scheduler.spawn(async { Ok::<_, fiber_rt::error::FiberError>(40 + 2) });
//! assert_eq!(handle.block_on_and_rethrow().unwrap(), 42);
//! scheduler.shutdown();
//! scheduler.join_workers();
//! ```

pub mod adapters;
pub mod error;
pub mod executor;
pub mod fiber;
pub(crate) mod loom;
pub mod park;
pub mod reactor;
pub mod scheduler;
pub mod spinlock;
pub mod strand;
pub mod sync;
pub mod this_fiber;
pub mod future;

pub use error::{FiberError, FiberId};
pub use fiber::local::FiberLocal;
pub use fiber::JoinHandle;
pub use scheduler::{default_scheduler, greenify, Scheduler, SchedulerConfig};
pub use strand::Strand;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerConfig;

    #[test]
    fn smoke_spawn_and_join() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_threads: 2,
            ..Default::default()
        });
        let handle = scheduler.spawn(async { Ok::<_, FiberError>(7) });
        assert_eq!(handle.block_on_and_rethrow().unwrap(), 7);
        scheduler.shutdown();
        scheduler.join_workers();
    }
}
