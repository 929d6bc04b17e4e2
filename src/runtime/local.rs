//! Thread-local registry of suspended tasks.
//!
//! Tasks are bound to the thread that created them and are not `Send`.
//! A waker cannot carry the task itself across threads, so it carries the
//! [`TaskId`] and posts a closure to the home loop that looks the task up
//! here and resumes it.

use crate::task::TaskId;
use crate::tracing_compat::trace;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Weak;

/// A task that can be resumed by id.
pub(crate) trait Resume {
    /// Polls the task once. Must be a no-op once the task has completed.
    fn resume(&self);
}

thread_local! {
    /// Live tasks owned by the current thread.
    static LOCAL_TASKS: RefCell<HashMap<TaskId, Weak<dyn Resume>>> = RefCell::new(HashMap::new());
}

/// Registers a task on the current thread.
pub(crate) fn register(id: TaskId, task: Weak<dyn Resume>) {
    let _ = LOCAL_TASKS.try_with(|tasks| {
        let previous = tasks.borrow_mut().insert(id, task);
        debug_assert!(previous.is_none(), "duplicate local task id {id}");
    });
}

/// Removes a task from the current thread's registry.
pub(crate) fn unregister(id: TaskId) {
    let _ = LOCAL_TASKS.try_with(|tasks| tasks.borrow_mut().remove(&id));
}

/// Resumes the task with the given id, if it is still alive on this thread.
pub(crate) fn resume(id: TaskId) {
    let task = LOCAL_TASKS
        .try_with(|tasks| tasks.borrow().get(&id).and_then(Weak::upgrade))
        .ok()
        .flatten();
    match task {
        Some(task) => task.resume(),
        None => trace!(task_id = %id, "wake for a finished or dropped task"),
    }
}

/// Number of tasks registered on this thread.
pub(crate) fn local_task_count() -> usize {
    LOCAL_TASKS.try_with(|tasks| tasks.borrow().len()).unwrap_or(0)
}
