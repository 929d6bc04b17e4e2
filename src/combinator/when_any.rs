//! Wait for the first of several futures to complete.
//!
//! Each source runs in its own internal [`Task`], started eagerly in order.
//! The first task to complete wins; its completion subscription records the
//! result and wakes the [`WhenAny`] future. From that moment on, no other
//! source's completion is observed: the remaining subscriptions are dropped
//! right away, and the losing tasks (with their futures) are dropped when
//! the winner is taken or the `WhenAny` itself is dropped.
//!
//! Losers are cancelled by being dropped at their current suspension point.
//! Code a loser has already run is not undone.
//!
//! # Example
//!
//! ```
//! use dispatchkit::combinator::{when_any2, AnyOf2};
//! use dispatchkit::task::Task;
//! use dispatchkit::time::sleep;
//! use std::time::Duration;
//!
//! let race = Task::new(when_any2(
//!     async {
//!         sleep(Duration::from_secs(60)).await;
//!         "slow"
//!     },
//!     async { 7_u32 },
//! ));
//! assert_eq!(race.value(), Ok(Ok(AnyOf2::Second(7))));
//! ```

use crate::error::TaskError;
use crate::notify::{Callback, SubscribeMode};
use crate::sync::FastMutex;
use crate::task::Task;
use crate::tracing_compat::trace;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

type Completion<T> = Callback<Result<T, TaskError>>;

struct Race<T> {
    winner: Option<(usize, Result<T, TaskError>)>,
    resolved: bool,
    waker: Option<Waker>,
    subscriptions: Vec<Completion<T>>,
}

impl<T> Race<T> {
    /// Records `result` if nothing has won yet. Returns the subscriptions to
    /// drop (outside the lock) and the waker to wake.
    fn settle(
        &mut self,
        index: usize,
        result: Result<T, TaskError>,
    ) -> Option<(Vec<Completion<T>>, Option<Waker>)> {
        if self.resolved {
            return None;
        }
        self.resolved = true;
        self.winner = Some((index, result));
        Some((std::mem::take(&mut self.subscriptions), self.waker.take()))
    }
}

/// Future returned by [`when_any`].
///
/// Resolves to the index and value of the first source to complete, or to
/// the failure of that source if it panicked. An empty set of sources
/// resolves to [`TaskError::Abandoned`].
#[must_use = "futures do nothing unless polled"]
pub struct WhenAny<T: Clone + Send + 'static> {
    race: Arc<FastMutex<Race<T>>>,
    tasks: Vec<Task<T>>,
}

impl<T: Clone + Send + 'static> WhenAny<T> {
    fn start<I, F>(sources: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T> + 'static,
    {
        let race = Arc::new(FastMutex::new(Race {
            winner: None,
            resolved: false,
            waker: None,
            subscriptions: Vec::new(),
        }));
        let mut tasks = Vec::new();

        for (index, source) in sources.into_iter().enumerate() {
            let task = Task::new(source);
            if task.done() {
                // Completed before a subscription could observe it.
                let _settled = race.lock().settle(index, task.value());
                trace!(index, "when_any source completed eagerly");
                break;
            }
            let sink = Arc::clone(&race);
            let subscription = task.subscribe(
                move |result| {
                    let settled = sink.lock().settle(index, result);
                    if let Some((losers, waker)) = settled {
                        trace!(index, "when_any source won");
                        drop(losers);
                        if let Some(waker) = waker {
                            waker.wake();
                        }
                    }
                },
                SubscribeMode::SYNCHRONOUS.once(),
            );
            race.lock().subscriptions.push(subscription);
            tasks.push(task);
        }

        let mut state = race.lock();
        if !state.resolved && tasks.is_empty() {
            state.resolved = true;
            state.winner = Some((0, Err(TaskError::Abandoned)));
        }
        let stale = if state.resolved {
            std::mem::take(&mut state.subscriptions)
        } else {
            Vec::new()
        };
        drop(state);
        drop(stale);

        Self { race, tasks }
    }

    /// Number of sources still racing.
    #[must_use]
    pub fn pending(&self) -> usize {
        if self.race.lock().resolved {
            0
        } else {
            self.tasks.len()
        }
    }
}

impl<T: Clone + Send + 'static> Future for WhenAny<T> {
    type Output = Result<(usize, T), TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let winner = {
            let mut race = self.race.lock();
            match race.winner.take() {
                Some(winner) => winner,
                None if race.resolved => return Poll::Ready(Err(TaskError::Pending)),
                None => {
                    match &mut race.waker {
                        Some(w) if w.will_wake(cx.waker()) => {}
                        other => *other = Some(cx.waker().clone()),
                    }
                    return Poll::Pending;
                }
            }
        };
        // Tear down the losers.
        self.tasks.clear();
        let (index, result) = winner;
        Poll::Ready(result.map(|value| (index, value)))
    }
}

impl<T: Clone + Send + 'static> Drop for WhenAny<T> {
    fn drop(&mut self) {
        let subscriptions = std::mem::take(&mut self.race.lock().subscriptions);
        drop(subscriptions);
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for WhenAny<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhenAny")
            .field("sources", &self.tasks.len())
            .field("resolved", &self.race.lock().resolved)
            .finish()
    }
}

/// Races `sources` and resolves to `(index, value)` of the first to complete.
///
/// Sources are started in order; once one completes, the rest are not
/// started at all.
pub fn when_any<I, F, T>(sources: I) -> WhenAny<T>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = T> + 'static,
    T: Clone + Send + 'static,
{
    WhenAny::start(sources)
}

type Source<T> = Pin<Box<dyn Future<Output = T>>>;

macro_rules! any_of {
    (
        $(#[$meta:meta])*
        $name:ident, $func:ident, $($var:ident($arg:ident): $fut:ident => $out:ident @ $idx:literal),+
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name<$($out),+> {
            $(
                #[allow(missing_docs)]
                $var($out),
            )+
        }

        impl<$($out),+> $name<$($out),+> {
            /// Zero-based position of the winning source.
            #[must_use]
            pub const fn index(&self) -> usize {
                match self {
                    $(Self::$var(_) => $idx,)+
                }
            }
        }

        #[doc = concat!("Races heterogeneous sources, resolving to [`", stringify!($name), "`].")]
        ///
        /// Same semantics as [`when_any`].
        pub async fn $func<$($fut,)+ $($out),+>($($arg: $fut),+) -> Result<$name<$($out),+>, TaskError>
        where
            $(
                $fut: Future<Output = $out> + 'static,
                $out: Clone + Send + 'static,
            )+
        {
            let sources: Vec<Source<$name<$($out),+>>> = vec![
                $(Box::pin(async move { $name::$var($arg.await) }),)+
            ];
            when_any(sources).await.map(|(_, value)| value)
        }
    };
}

any_of!(
    /// Winner of [`when_any2`].
    AnyOf2, when_any2,
    First(a): FA => A @ 0,
    Second(b): FB => B @ 1
);

any_of!(
    /// Winner of [`when_any3`].
    AnyOf3, when_any3,
    First(a): FA => A @ 0,
    Second(b): FB => B @ 1,
    Third(c): FC => C @ 2
);

any_of!(
    /// Winner of [`when_any4`].
    AnyOf4, when_any4,
    First(a): FA => A @ 0,
    Second(b): FB => B @ 1,
    Third(c): FC => C @ 2,
    Fourth(d): FD => D @ 3
);
