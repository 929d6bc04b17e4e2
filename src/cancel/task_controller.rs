//! Lifecycle wrapper around a restartable task.
//!
//! ```text
//!  NotRunnable ──set_function──► Runnable ──run──► Running ──► Done
//!                                   ▲                            │
//!                                   └───────────reset────────────┘
//! ```
//!
//! Every [`run`](TaskController::run) starts from a fresh
//! [`StopAndProgressSource`], so a stop requested for one run never leaks
//! into the next. Changing the function, resetting or running again while a
//! run is in progress fails with [`ErrorKind::TaskRunning`].

use super::stop_progress::{Progress, StopAndProgressSource, StopAndProgressToken};
use crate::error::{Error, ErrorKind, Result, TaskError};
use crate::notify::{Callback, Notifier, SubscribeMode};
use crate::task::Task;
use crate::tracing_compat::debug;
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a [`TaskController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskControllerState {
    /// No function has been set.
    NotRunnable,
    /// A function is set and no run is in progress or finished.
    Runnable,
    /// The task is executing.
    Running,
    /// The last run finished; its value is available.
    Done,
}

type TaskFactory<T> = Box<dyn Fn(StopAndProgressToken) -> Task<T>>;

/// Runs a task factory with fresh stop/progress state on every run.
///
/// ```
/// use dispatchkit::cancel::{TaskController, TaskControllerState};
/// use dispatchkit::task::Task;
///
/// let mut controller = TaskController::new();
/// controller
///     .set_function(|token| Task::new(async move { token.stop_requested() }))
///     .unwrap();
/// controller.run().unwrap();
/// assert_eq!(controller.state(), TaskControllerState::Done);
/// assert_eq!(controller.value(), Ok(false));
/// ```
pub struct TaskController<T: Clone + Send + 'static> {
    factory: Option<TaskFactory<T>>,
    source: StopAndProgressSource,
    task: Option<Task<T>>,
    completion: Option<Callback<std::result::Result<T, TaskError>>>,
    changes: Arc<Notifier<TaskControllerState>>,
}

impl<T: Clone + Send + 'static> TaskController<T> {
    /// Creates a controller with no function.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factory: None,
            source: StopAndProgressSource::new(),
            task: None,
            completion: None,
            changes: Arc::new(Notifier::new()),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskControllerState {
        match (&self.factory, &self.task) {
            (_, Some(task)) if task.done() => TaskControllerState::Done,
            (_, Some(_)) => TaskControllerState::Running,
            (Some(_), None) => TaskControllerState::Runnable,
            (None, None) => TaskControllerState::NotRunnable,
        }
    }

    /// Returns true while a run is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == TaskControllerState::Running
    }

    fn ensure_idle(&self, operation: &str) -> Result<()> {
        if self.is_running() {
            return Err(Error::task_running(operation));
        }
        Ok(())
    }

    fn changed(&self) {
        let state = self.state();
        debug!(?state, "task controller state changed");
        self.changes.notify(state);
    }

    /// Sets the function that creates the task for each run.
    ///
    /// Discards the result of a previous run.
    pub fn set_function<F>(&mut self, factory: F) -> Result<()>
    where
        F: Fn(StopAndProgressToken) -> Task<T> + 'static,
    {
        self.ensure_idle("set the function")?;
        self.factory = Some(Box::new(factory));
        self.discard_run();
        self.changed();
        Ok(())
    }

    /// Discards the result of the last run.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_idle("reset")?;
        self.discard_run();
        self.changed();
        Ok(())
    }

    fn discard_run(&mut self) {
        self.completion = None;
        self.task = None;
    }

    /// Starts a run with a fresh stop/progress state.
    ///
    /// The task runs eagerly up to its first suspension point before this
    /// returns, so a run without suspension points is already
    /// [`Done`](TaskControllerState::Done).
    pub fn run(&mut self) -> Result<()> {
        self.ensure_idle("run")?;
        let Some(factory) = &self.factory else {
            return Err(Error::new(ErrorKind::NotRunnable).with_message("no function has been set"));
        };
        self.completion = None;
        self.task = None;
        self.source = StopAndProgressSource::new();
        let task = factory(self.source.token());

        if !task.done() {
            let changes = Arc::clone(&self.changes);
            self.completion = Some(task.subscribe(
                move |_| changes.notify(TaskControllerState::Done),
                SubscribeMode::SYNCHRONOUS.once(),
            ));
        }
        self.task = Some(task);
        self.changed();
        Ok(())
    }

    /// Asks the running task to stop. Cooperative: the task decides.
    pub fn request_stop(&self) {
        self.source.request_stop();
    }

    /// Returns true if stop was requested for the current run.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.source.stop_requested()
    }

    /// Major and minor progress of the current run.
    #[must_use]
    pub fn progress(&self) -> (Progress, Progress) {
        (self.source.major_progress(), self.source.minor_progress())
    }

    /// Stop/progress source of the current run.
    #[must_use]
    pub fn source(&self) -> &StopAndProgressSource {
        &self.source
    }

    /// The task of the current run, if any.
    #[must_use]
    pub fn task(&self) -> Option<&Task<T>> {
        self.task.as_ref()
    }

    /// Outcome of the last run; [`TaskError::Pending`] until it is done.
    pub fn value(&self) -> std::result::Result<T, TaskError> {
        self.task
            .as_ref()
            .map_or(Err(TaskError::Pending), Task::value)
    }

    /// Subscribes to state changes.
    #[must_use = "dropping the handle unsubscribes immediately"]
    pub fn subscribe<F>(&self, f: F, mode: SubscribeMode) -> Callback<TaskControllerState>
    where
        F: Fn(TaskControllerState) + Send + Sync + 'static,
    {
        self.changes.subscribe(f, mode)
    }
}

impl<T: Clone + Send + 'static> Default for TaskController<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for TaskController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskController")
            .field("state", &self.state())
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}
