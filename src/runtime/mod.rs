//! Event loops and the queues they drain.
//!
//! - [`event_loop`]: [`Loop`], the per-thread scheduler, and its singletons
//! - [`closure_queue`]: ring buffer of posted closures
//! - [`timer`]: deadline-ordered timer queue
//! - [`async_result`]: result handle of [`Loop::async_function`]
//! - [`config`] / [`env_config`]: loop configuration, environment and file overrides
//!
//! # Quick Start
//!
//! ```
//! use dispatchkit::runtime::Loop;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//!
//! let event_loop = Loop::local();
//! let ran = Arc::new(AtomicBool::new(false));
//! let flag = Arc::clone(&ran);
//! event_loop.post_function(move || flag.store(true, Ordering::SeqCst));
//!
//! // No stop token: returns once no work is left.
//! let code = event_loop.resume(None);
//! assert_eq!(code, 0);
//! assert!(ran.load(Ordering::SeqCst));
//! ```

pub mod async_result;
pub mod closure_queue;
pub mod config;
pub mod env_config;
pub mod event_loop;
pub(crate) mod local;
pub mod timer;
pub(crate) mod waker;

pub use async_result::AsyncResult;
pub use closure_queue::{Closure, ClosureQueue};
pub use config::LoopConfig;
#[cfg(unix)]
pub use event_loop::SocketEvents;
pub use event_loop::Loop;
pub use timer::{TimerHandle, TimerQueue};
