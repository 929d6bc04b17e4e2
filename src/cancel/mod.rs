//! Cooperative cancellation and progress reporting.
//!
//! - [`stop_progress`]: [`StopAndProgressSource`] and the reference-counted
//!   [`StopAndProgressToken`] sharing one stop/progress block
//! - [`task_controller`]: [`TaskController`], a restartable task lifecycle
//!   built on a fresh source per run

pub mod stop_progress;
pub mod task_controller;

pub use stop_progress::{Progress, SourceEvent, StopAndProgressSource, StopAndProgressToken, Stopped};
pub use task_controller::{TaskController, TaskControllerState};
