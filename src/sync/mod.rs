//! Locking primitives shared by every loop and notifier.
//!
//! # Primitives
//!
//! - [`FastMutex`]: A three-state blocking mutex with a lock-free fast path
//! - [`DeadLockDetector`]: Per-thread lock stacks plus a global lock-order
//!   graph that reports potential deadlocks
//!
//! Every `FastMutex` created with [`FastMutex::new`](parking_lot::lock_api::Mutex::new)
//! is instrumented: while the detector is enabled (the default in debug
//! builds), acquiring it records the lock order and panics on a conflict.
//! Guards cannot leave the thread that acquired them.

mod dead_lock_detector;
mod fast_mutex;

pub use dead_lock_detector::{DeadLockDetector, LockId};
pub use fast_mutex::{unverified, FastMutex, FastMutexGuard, RawFastMutex};
