//! Dispatchkit: per-thread event loops, resumable tasks and cooperative cancellation.
//!
//! # Overview
//!
//! Dispatchkit is the asynchronous dispatch substrate for an application
//! that keeps its work on a small number of well-known threads. Every thread
//! may own one event loop; a designated main loop and a dedicated timer loop
//! are reachable from anywhere. Work reaches a loop as posted closures,
//! deadline timers, socket readiness or render ticks.
//!
//! # Core Guarantees
//!
//! - **No lock held across user code**: posted closures, timer callbacks,
//!   notifier subscribers and task bodies always run with every internal
//!   lock released, so they may post, subscribe or unsubscribe freely
//! - **Weak subscriptions**: the subscriber owns the callback handle;
//!   dropping it unsubscribes, and expired entries are purged lazily
//! - **Captured failures**: a panicking task body becomes a stored
//!   [`TaskError`], delivered to every reader
//! - **Verified lock order**: in debug builds every [`FastMutex`]
//!   acquisition is checked against a global lock-order graph
//!
//! # Module Structure
//!
//! - [`sync`]: Fast mutex and the lock-order verifier
//! - [`notify`]: Callback handles and the subscribe/notify hub
//! - [`runtime`]: Event loops, closure and timer queues, configuration
//! - [`task`]: Eagerly started, resumable tasks with stored results
//! - [`time`]: Sleep futures driven by the loop's timer queue
//! - [`combinator`]: Waiting for the first of several futures
//! - [`cancel`]: Stop/progress source and token, task controller
//! - [`error`]: Error types

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod combinator;
pub mod error;
pub mod notify;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;
pub mod tracing_compat;

#[cfg(test)]
pub(crate) mod test_utils;

pub use cancel::{
    Progress, SourceEvent, StopAndProgressSource, StopAndProgressToken, TaskController,
    TaskControllerState,
};
pub use combinator::{when_any, when_any2, when_any3, when_any4, AnyOf2, AnyOf3, AnyOf4, WhenAny};
pub use error::{Error, ErrorCategory, ErrorKind, Result, TaskError};
pub use notify::{Callback, Delivery, Notifier, SubscribeMode, WeakCallback};
pub use runtime::{AsyncResult, Loop, LoopConfig, TimerHandle};
pub use sync::{DeadLockDetector, FastMutex, FastMutexGuard, LockId};
pub use task::{Task, TaskId};
pub use time::{sleep, sleep_until, Sleep};
