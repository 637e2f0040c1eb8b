// Copyright 2026 The fiber-rt Authors.
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Indirection over `core`/`std` vs. `loom` primitives.
//!
//! Grounded on the `crate::loom` shim used throughout the teacher's
//! workspace (see e.g. `mpsc-queue`'s own `loom` module): production builds
//! use the real atomics and the real OS thread; `cfg(loom)` builds swap in
//! `loom`'s instrumented equivalents so the interleaving tests in
//! `sync::mutex` and `spinlock` can explore the state space exhaustively.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::sync;
        pub(crate) use loom::thread;
        pub(crate) use loom::model;

        pub(crate) mod cell {
            pub(crate) use loom::cell::UnsafeCell;
        }
    } else {
        pub(crate) use std::sync;
        pub(crate) use std::thread;

        #[cfg(test)]
        #[inline(always)]
        pub(crate) fn model<R>(f: impl FnOnce() -> R) -> R {
            f()
        }

        pub(crate) mod cell {
            /// A thin `UnsafeCell` wrapper matching loom's API surface, so that
            /// call sites are identical under both configurations.
            #[derive(Debug)]
            pub(crate) struct UnsafeCell<T>(core::cell::UnsafeCell<T>);

            impl<T> UnsafeCell<T> {
                pub(crate) const fn new(data: T) -> Self {
                    Self(core::cell::UnsafeCell::new(data))
                }

                #[inline(always)]
                pub(crate) fn with<R>(&self, f: impl FnOnce(*const T) -> R) -> R {
                    f(self.0.get())
                }

                #[inline(always)]
                pub(crate) fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
                    f(self.0.get())
                }
            }
        }
    }
}
