//! Sleep future backed by the loop's timer queue.
//!
//! The [`Sleep`] future completes once its deadline has passed. A sleep
//! whose deadline is already due completes on its first poll; otherwise the
//! first poll schedules a one-shot timer on the calling thread's loop, whose
//! firing wakes the awaiting task.
//!
//! # Cancel Safety
//!
//! `Sleep` is cancel-safe. Dropping it drops the timer handle, which
//! cancels the timer.

use crate::runtime::{Loop, TimerHandle};
use crate::sync::FastMutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct SleepState {
    fired: bool,
    waker: Option<Waker>,
}

/// A future that completes at a deadline.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    deadline: Instant,
    state: Arc<FastMutex<SleepState>>,
    timer: Option<TimerHandle>,
}

impl Sleep {
    /// Creates a `Sleep` that completes at `deadline`.
    pub fn new(deadline: Instant) -> Self {
        Self {
            deadline,
            state: Arc::new(FastMutex::new(SleepState::default())),
            timer: None,
        }
    }

    /// Returns the deadline for this sleep.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Returns the time left until the deadline, zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Returns true if the deadline has passed.
    #[must_use]
    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Moves the deadline, cancelling any scheduled timer.
    pub fn reset(&mut self, deadline: Instant) {
        self.deadline = deadline;
        self.timer = None;
        *self.state.lock() = SleepState::default();
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.is_elapsed() {
            self.timer = None;
            return Poll::Ready(());
        }
        {
            let mut state = self.state.lock();
            if state.fired {
                return Poll::Ready(());
            }
            match &mut state.waker {
                Some(w) if w.will_wake(cx.waker()) => {}
                other => *other = Some(cx.waker().clone()),
            }
        }
        if self.timer.is_none() {
            let state = Arc::clone(&self.state);
            let handle = Loop::local().delay_function(self.deadline, move || {
                let waker = {
                    let mut state = state.lock();
                    state.fired = true;
                    state.waker.take()
                };
                if let Some(waker) = waker {
                    waker.wake();
                }
            });
            self.timer = Some(handle);
        }
        Poll::Pending
    }
}

/// Completes after `duration`.
///
/// ```
/// use dispatchkit::task::Task;
/// use dispatchkit::time::sleep;
/// use std::time::Duration;
///
/// let task = Task::new(async {
///     sleep(Duration::ZERO).await;
///     "slept"
/// });
/// assert_eq!(task.value(), Ok("slept"));
/// ```
pub fn sleep(duration: Duration) -> Sleep {
    Sleep::new(Instant::now() + duration)
}

/// Completes at `deadline`.
pub fn sleep_until(deadline: Instant) -> Sleep {
    Sleep::new(deadline)
}
