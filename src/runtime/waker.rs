//! Waker that resumes a task on its home loop.
//!
//! Waking posts one resume closure to the loop that owns the task. Wakes
//! that arrive while a resume is already queued are folded into it, so a
//! burst of wake-ups costs one poll.

use super::event_loop::Loop;
use super::local;
use crate::task::TaskId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Wake, Waker};

/// Creates the waker for `task`, owned by `home`.
///
/// `queued` is shared by every waker of the task and is set while a resume
/// closure is pending on the loop.
pub(crate) fn task_waker(task: TaskId, home: Loop, queued: Arc<AtomicBool>) -> Waker {
    Waker::from(Arc::new(TaskWaker { task, home, queued }))
}

/// Posts a resume of `task` to `home` unless one is already pending.
pub(crate) fn schedule(task: TaskId, home: &Loop, queued: &Arc<AtomicBool>) {
    if queued.swap(true, Ordering::AcqRel) {
        return;
    }
    let queued = Arc::clone(queued);
    home.post_function(move || {
        queued.store(false, Ordering::Release);
        local::resume(task);
    });
}

struct TaskWaker {
    task: TaskId,
    home: Loop,
    queued: Arc<AtomicBool>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        schedule(self.task, &self.home, &self.queued);
    }
}
