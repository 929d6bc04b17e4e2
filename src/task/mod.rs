//! Resumable tasks bound to the loop of the thread that created them.
//!
//! A [`Task`] wraps a future and drives it to completion on its home loop.
//! It starts eagerly: [`Task::new`] polls the future once before returning,
//! so a task whose first suspension point is already satisfied is
//! [`done`](Task::done) immediately. Later polls happen when the future's
//! waker fires; the waker posts a resume to the home loop, which may be
//! woken from any thread.
//!
//! On completion the future is dropped, the outcome is stored, and the
//! task's completion [`Notifier`] fires exactly once with a clone of the
//! outcome. A panic inside the future is captured as
//! [`TaskError::Panicked`] and delivered the same way.
//!
//! Dropping every handle to an unfinished task drops its future at its
//! current suspension point. That is the only way to cancel a task from the
//! outside; cooperative cancellation goes through
//! [`StopAndProgressToken`](crate::cancel::StopAndProgressToken).
//!
//! # Example
//!
//! ```
//! use dispatchkit::task::Task;
//!
//! let task = Task::new(async { 40 + 2 });
//! assert!(task.done());
//! assert_eq!(task.value(), Ok(42));
//! ```

use crate::error::TaskError;
use crate::notify::{Callback, Notifier, SubscribeMode};
use crate::runtime::local::{self, Resume};
use crate::runtime::waker;
use crate::runtime::Loop;
use crate::tracing_compat::trace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Unique identifier of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

type BoxedFuture<T> = Pin<Box<dyn Future<Output = T>>>;

struct TaskCore<T: Clone + Send + 'static> {
    id: TaskId,
    home: Loop,
    started: Cell<bool>,
    future: RefCell<Option<BoxedFuture<T>>>,
    outcome: RefCell<Option<Result<T, TaskError>>>,
    waiters: RefCell<Vec<Waker>>,
    queued: Arc<AtomicBool>,
    completion: Notifier<Result<T, TaskError>>,
}

impl<T: Clone + Send + 'static> TaskCore<T> {
    fn poll_once(&self) {
        let Ok(mut slot) = self.future.try_borrow_mut() else {
            // Resumed from inside its own poll: try again from the loop.
            waker::schedule(self.id, &self.home, &self.queued);
            return;
        };
        let Some(future) = slot.as_mut() else {
            return;
        };
        let waker = waker::task_waker(self.id, self.home.clone(), Arc::clone(&self.queued));
        let mut cx = Context::from_waker(&waker);
        let outcome = match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => return,
            Ok(Poll::Ready(value)) => Ok(value),
            Err(payload) => Err(TaskError::from_panic(payload.as_ref())),
        };
        *slot = None;
        drop(slot);
        self.finish(outcome);
    }

    fn finish(&self, outcome: Result<T, TaskError>) {
        trace!(task_id = %self.id, ok = outcome.is_ok(), "task completed");
        *self.outcome.borrow_mut() = Some(outcome.clone());
        local::unregister(self.id);
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waiter in waiters {
            waiter.wake();
        }
        self.completion.notify(outcome);
    }

    fn is_done(&self) -> bool {
        self.outcome.borrow().is_some()
    }
}

impl<T: Clone + Send + 'static> Resume for TaskCore<T> {
    fn resume(&self) {
        if self.started.get() {
            self.poll_once();
        }
    }
}

impl<T: Clone + Send + 'static> Drop for TaskCore<T> {
    fn drop(&mut self) {
        if !self.is_done() {
            trace!(task_id = %self.id, "unfinished task dropped");
            local::unregister(self.id);
        }
    }
}

/// Handle to a resumable computation.
///
/// Handles are cheap to clone and stay on the creating thread. The task
/// lives as long as at least one handle does.
pub struct Task<T: Clone + Send + 'static> {
    core: Rc<TaskCore<T>>,
}

impl<T: Clone + Send + 'static> Task<T> {
    /// Creates a task and runs it up to its first suspension point.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + 'static,
    {
        let task = Self::deferred(future);
        task.start();
        task
    }

    /// Creates a task that does not run until [`start`](Self::start).
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = T> + 'static,
    {
        let core = Rc::new(TaskCore {
            id: TaskId::next(),
            home: Loop::local(),
            started: Cell::new(false),
            future: RefCell::new(Some(Box::pin(future))),
            outcome: RefCell::new(None),
            waiters: RefCell::new(Vec::new()),
            queued: Arc::new(AtomicBool::new(false)),
            completion: Notifier::new(),
        });
        let weak: Weak<TaskCore<T>> = Rc::downgrade(&core);
        local::register(core.id, weak);
        Self { core }
    }

    /// Runs a deferred task up to its first suspension point.
    ///
    /// Has no effect on a task that has already started.
    pub fn start(&self) {
        if self.core.started.replace(true) {
            return;
        }
        trace!(task_id = %self.core.id, "task started");
        self.core.poll_once();
    }

    /// Identifier of this task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.core.id
    }

    /// Loop that resumes this task.
    #[must_use]
    pub fn home(&self) -> &Loop {
        &self.core.home
    }

    /// Returns true once the task has begun executing.
    #[must_use]
    pub fn started(&self) -> bool {
        self.core.started.get()
    }

    /// Returns true while the task has started but not completed.
    #[must_use]
    pub fn running(&self) -> bool {
        self.started() && !self.done()
    }

    /// Returns true once the task has produced a value or failed.
    #[must_use]
    pub fn done(&self) -> bool {
        self.core.is_done()
    }

    /// The task's outcome.
    ///
    /// Returns [`TaskError::Pending`] before the task is [`done`](Self::done).
    pub fn value(&self) -> Result<T, TaskError> {
        self.core
            .outcome
            .borrow()
            .clone()
            .unwrap_or(Err(TaskError::Pending))
    }

    /// Subscribes to the task's completion.
    ///
    /// The completion fires once; subscribing after the task is done never
    /// calls `f`, so check [`done`](Self::done) first.
    #[must_use = "dropping the handle unsubscribes immediately"]
    pub fn subscribe<F>(&self, f: F, mode: SubscribeMode) -> Callback<Result<T, TaskError>>
    where
        F: Fn(Result<T, TaskError>) + Send + Sync + 'static,
    {
        self.core.completion.subscribe(f, mode)
    }
}

impl<T: Clone + Send + 'static> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + Send + 'static> Future for Task<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.core.outcome.borrow().clone() {
            return Poll::Ready(outcome);
        }
        let mut waiters = self.core.waiters.borrow_mut();
        if !waiters.iter().any(|w| w.will_wake(cx.waker())) {
            waiters.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.core.id)
            .field("started", &self.started())
            .field("done", &self.done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Notifier;
    use crate::test_utils::run_local_until;
    use crate::time::sleep;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn ready_task_is_done_without_a_loop_turn() {
        init_test("ready_task_is_done_without_a_loop_turn");
        let task = Task::new(async { "now" });
        crate::assert_with_log!(task.done(), "done", true, task.done());
        crate::assert_with_log!(!task.running(), "not running", false, task.running());
        let value = task.value();
        crate::assert_with_log!(value == Ok("now"), "value", "Ok(now)", value);
        let registered = local::local_task_count();
        crate::assert_with_log!(registered == 0, "unregistered", 0, registered);
        crate::test_complete!("ready_task_is_done_without_a_loop_turn");
    }

    #[test]
    fn value_before_completion_is_pending() {
        init_test("value_before_completion_is_pending");
        let notifier: Rc<Notifier<u32>> = Rc::new(Notifier::new());
        let n = Rc::clone(&notifier);
        let task = Task::new(async move { n.wait().await });
        crate::assert_with_log!(task.running(), "suspended", true, task.running());
        let value = task.value();
        crate::assert_with_log!(value == Err(TaskError::Pending), "pending", "Err(Pending)", value);

        notifier.notify(5);
        let done = run_local_until(Duration::from_secs(2), || task.done());
        crate::assert_with_log!(done, "resumed", true, done);
        let value = task.value();
        crate::assert_with_log!(value == Ok(5), "value", "Ok(5)", value);
        crate::test_complete!("value_before_completion_is_pending");
    }

    #[test]
    fn deferred_task_waits_for_start() {
        init_test("deferred_task_waits_for_start");
        let runs = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&runs);
        let task = Task::deferred(async move { r.fetch_add(1, Ordering::SeqCst) });
        crate::assert_with_log!(!task.started(), "not started", false, task.started());
        crate::assert_with_log!(runs.load(Ordering::SeqCst) == 0, "no run", 0, runs.load(Ordering::SeqCst));
        task.start();
        task.start();
        crate::assert_with_log!(task.done(), "done", true, task.done());
        crate::assert_with_log!(runs.load(Ordering::SeqCst) == 1, "ran once", 1, runs.load(Ordering::SeqCst));
        crate::test_complete!("deferred_task_waits_for_start");
    }

    #[test]
    fn completion_fires_once_with_value() {
        init_test("completion_fires_once_with_value");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let task = Task::new(async {
            sleep(Duration::from_millis(5)).await;
            7_u8
        });
        let s = Arc::clone(&seen);
        let _sub = task.subscribe(move |r| s.lock().push(r), SubscribeMode::SYNCHRONOUS);
        let done = run_local_until(Duration::from_secs(2), || task.done());
        crate::assert_with_log!(done, "done", true, done);
        let seen = seen.lock().clone();
        crate::assert_with_log!(seen == vec![Ok(7)], "fired once", "[Ok(7)]", seen);
        crate::test_complete!("completion_fires_once_with_value");
    }

    #[test]
    fn panic_is_captured_and_delivered() {
        init_test("panic_is_captured_and_delivered");
        let notifier: Rc<Notifier<()>> = Rc::new(Notifier::new());
        let n = Rc::clone(&notifier);
        fn fail() -> u32 {
            panic!("task body failed")
        }
        let task = Task::new(async move {
            n.wait().await;
            fail()
        });
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let _sub = task.subscribe(move |r| *s.lock() = Some(r), SubscribeMode::SYNCHRONOUS);

        notifier.notify(());
        let done = run_local_until(Duration::from_secs(2), || task.done());
        crate::assert_with_log!(done, "done", true, done);
        let expected = Err(TaskError::Panicked("task body failed".to_string()));
        let value = task.value();
        crate::assert_with_log!(value == expected, "stored failure", expected, value);
        let delivered = seen.lock().clone();
        crate::assert_with_log!(delivered == Some(expected.clone()), "delivered", expected, delivered);
        crate::test_complete!("panic_is_captured_and_delivered");
    }

    #[test]
    fn awaiting_another_task() {
        init_test("awaiting_another_task");
        let inner = Task::new(async {
            sleep(Duration::from_millis(5)).await;
            20
        });
        let waiting_on = inner.clone();
        let outer = Task::new(async move { waiting_on.await.map(|v| v + 1) });
        crate::assert_with_log!(!outer.done(), "outer suspended", false, outer.done());
        let done = run_local_until(Duration::from_secs(2), || outer.done());
        crate::assert_with_log!(done, "done", true, done);
        let value = outer.value();
        crate::assert_with_log!(value == Ok(Ok(21)), "chained", "Ok(Ok(21))", value);
        crate::test_complete!("awaiting_another_task");
    }

    #[test]
    fn dropping_the_task_drops_its_future() {
        init_test("dropping_the_task_drops_its_future");
        struct Flag(Arc<AtomicBool>);
        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = Flag(Arc::clone(&dropped));
        let task = Task::new(async move {
            let _flag = flag;
            sleep(Duration::from_secs(60)).await;
        });
        crate::assert_with_log!(task.running(), "suspended", true, task.running());
        drop(task);
        let was_dropped = dropped.load(Ordering::SeqCst);
        crate::assert_with_log!(was_dropped, "future dropped", true, was_dropped);
        let registered = local::local_task_count();
        crate::assert_with_log!(registered == 0, "unregistered", 0, registered);
        crate::test_complete!("dropping_the_task_drops_its_future");
    }
}
