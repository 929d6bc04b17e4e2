//! Result slot for work posted with [`Loop::async_function`](super::Loop::async_function).
//!
//! The producer side ([`Promise`]) fills the slot exactly once; the consumer
//! side ([`AsyncResult`]) can poll it as a future, block on it from another
//! thread, or check it without waiting. A promise dropped unfilled resolves
//! the result to [`TaskError::Abandoned`].

use crate::error::TaskError;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

struct State<R> {
    value: Option<Result<R, TaskError>>,
    waker: Option<Waker>,
    complete: bool,
}

struct Shared<R> {
    state: Mutex<State<R>>,
    ready: Condvar,
}

impl<R> Shared<R> {
    fn fulfil(&self, value: Result<R, TaskError>) {
        let waker = {
            let mut state = self.state.lock();
            if state.complete {
                return;
            }
            state.complete = true;
            state.value = Some(value);
            state.waker.take()
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Producer half; consumed when the result is delivered.
pub(crate) struct Promise<R> {
    shared: Option<Arc<Shared<R>>>,
}

impl<R> Promise<R> {
    pub(crate) fn complete(mut self, value: Result<R, TaskError>) {
        if let Some(shared) = self.shared.take() {
            shared.fulfil(value);
        }
    }
}

impl<R> Drop for Promise<R> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.fulfil(Err(TaskError::Abandoned));
        }
    }
}

/// Handle to the result of posted work.
#[must_use = "the result is lost if the handle is dropped"]
pub struct AsyncResult<R> {
    shared: Arc<Shared<R>>,
}

impl<R> AsyncResult<R> {
    pub(crate) fn pair() -> (Self, Promise<R>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                value: None,
                waker: None,
                complete: false,
            }),
            ready: Condvar::new(),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            Promise {
                shared: Some(shared),
            },
        )
    }

    /// Returns true once the work has finished, failed or been dropped.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.state.lock().complete
    }

    /// Takes the result if it is available.
    ///
    /// Returns `None` before completion and after the result was taken.
    pub fn try_take(&mut self) -> Option<Result<R, TaskError>> {
        self.shared.state.lock().value.take()
    }

    /// Blocks the calling thread until the result is available.
    ///
    /// Must not be called on the thread of the loop that runs the work,
    /// which would then never get to run it.
    pub fn wait(self) -> Result<R, TaskError> {
        let mut state = self.shared.state.lock();
        while !state.complete {
            self.shared.ready.wait(&mut state);
        }
        state.value.take().unwrap_or(Err(TaskError::Pending))
    }
}

impl<R> Future for AsyncResult<R> {
    type Output = Result<R, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        if state.complete {
            return Poll::Ready(state.value.take().unwrap_or(Err(TaskError::Pending)));
        }
        match &mut state.waker {
            Some(w) if w.will_wake(cx.waker()) => {}
            other => *other = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl<R> fmt::Debug for AsyncResult<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResult")
            .field("ready", &self.is_ready())
            .finish()
    }
}
