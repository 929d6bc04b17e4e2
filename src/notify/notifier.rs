//! Multicast subscription hub with per-subscriber delivery modes.
//!
//! A [`Notifier`] stores `(weak callback, mode)` pairs in subscription order.
//! [`notify`](Notifier::notify) snapshots the live entries under its lock,
//! releases the lock, and then either calls each subscriber inline or posts
//! the call to the subscriber's target loop. Subscribers may therefore
//! subscribe, unsubscribe or notify again from inside their callback.

use super::callback::{Callback, WeakCallback};
use crate::runtime::Loop;
use crate::sync::FastMutex;
use crate::tracing_compat::trace;
use smallvec::SmallVec;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Where a subscriber's callback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Inline, on the notifying thread, before `notify` returns.
    Synchronous,
    /// Posted to the loop of the thread that subscribed.
    Local,
    /// Posted to [`Loop::main`].
    Main,
    /// Posted to [`Loop::timer`].
    Timer,
}

/// Delivery mode plus the one-shot flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscribeMode {
    /// Where the callback runs.
    pub delivery: Delivery,
    /// Drop the subscription after its first scheduled invocation.
    pub once: bool,
}

impl SubscribeMode {
    /// Recurring inline delivery.
    pub const SYNCHRONOUS: Self = Self::recurring(Delivery::Synchronous);
    /// Recurring delivery on the subscriber's loop.
    pub const LOCAL: Self = Self::recurring(Delivery::Local);
    /// Recurring delivery on the main loop.
    pub const MAIN: Self = Self::recurring(Delivery::Main);
    /// Recurring delivery on the timer loop.
    pub const TIMER: Self = Self::recurring(Delivery::Timer);

    const fn recurring(delivery: Delivery) -> Self {
        Self {
            delivery,
            once: false,
        }
    }

    /// Returns the same delivery, limited to a single invocation.
    #[must_use]
    pub const fn once(self) -> Self {
        Self {
            delivery: self.delivery,
            once: true,
        }
    }
}

impl Default for SubscribeMode {
    fn default() -> Self {
        Self::SYNCHRONOUS
    }
}

struct Entry<A> {
    callback: WeakCallback<A>,
    mode: SubscribeMode,
    /// Captured at subscription time for [`Delivery::Local`].
    home: Option<Loop>,
}

enum Dispatch<A> {
    Inline(Callback<A>),
    Post(WeakCallback<A>, Delivery, Option<Loop>),
}

/// Ordered list of weak subscriptions.
///
/// # Example
///
/// ```
/// use dispatchkit::notify::{Notifier, SubscribeMode};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
///
/// let notifier: Notifier<u32> = Notifier::new();
/// let sum = Arc::new(AtomicU32::new(0));
/// let s = Arc::clone(&sum);
/// let handle = notifier.subscribe(
///     move |v| {
///         s.fetch_add(v, Ordering::SeqCst);
///     },
///     SubscribeMode::SYNCHRONOUS,
/// );
///
/// notifier.notify(2);
/// drop(handle);
/// notifier.notify(40);
/// assert_eq!(sum.load(Ordering::SeqCst), 2);
/// ```
pub struct Notifier<A = ()> {
    entries: FastMutex<Vec<Entry<A>>>,
}

impl<A> Notifier<A> {
    /// Creates an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: FastMutex::new(Vec::new()),
        }
    }

    /// Subscribes `func` and returns the handle that keeps it subscribed.
    ///
    /// Dropping every clone of the returned handle unsubscribes.
    #[must_use = "dropping the handle unsubscribes immediately"]
    pub fn subscribe<F>(&self, func: F, mode: SubscribeMode) -> Callback<A>
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        let callback = Callback::new(func);
        self.subscribe_callback(&callback, mode);
        callback
    }

    /// Subscribes an existing callback handle.
    pub fn subscribe_callback(&self, callback: &Callback<A>, mode: SubscribeMode) {
        let home = (mode.delivery == Delivery::Local).then(Loop::local);
        self.entries.lock().push(Entry {
            callback: callback.downgrade(),
            mode,
            home,
        });
    }

    /// Removes every subscription of `callback` without waiting for it to drop.
    pub fn unsubscribe(&self, callback: &Callback<A>) {
        self.entries
            .lock()
            .retain(|e| !e.callback.observes(callback) && !e.callback.expired());
    }

    /// Number of subscriptions whose callback is still alive.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| !e.callback.expired())
            .count()
    }

    /// Returns true if no live subscription remains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A: Clone + Send + 'static> Notifier<A> {
    /// Delivers `args` to every live subscriber.
    ///
    /// Synchronous subscribers run before this returns, in subscription
    /// order. Others are posted to their loop; a subscriber whose handle is
    /// dropped before the posted call runs is not invoked.
    pub fn notify(&self, args: A) {
        let plan: SmallVec<[Dispatch<A>; 8]> = {
            let mut entries = self.entries.lock();
            let mut plan = SmallVec::new();
            entries.retain(|entry| {
                let Some(callback) = entry.callback.lock() else {
                    return false;
                };
                if entry.mode.delivery == Delivery::Synchronous {
                    plan.push(Dispatch::Inline(callback));
                } else {
                    plan.push(Dispatch::Post(
                        entry.callback.clone(),
                        entry.mode.delivery,
                        entry.home.clone(),
                    ));
                }
                !entry.mode.once
            });
            plan
        };

        trace!(subscribers = plan.len(), "notify");
        for step in plan {
            match step {
                Dispatch::Inline(callback) => callback.call(args.clone()),
                Dispatch::Post(weak, delivery, home) => {
                    let target = match (delivery, home) {
                        (Delivery::Main, _) => Loop::main(),
                        (Delivery::Timer, _) => Loop::timer(),
                        (_, Some(home)) => home,
                        (_, None) => Loop::local(),
                    };
                    let args = args.clone();
                    target.post_function(move || {
                        if let Some(callback) = weak.lock() {
                            callback.call(args);
                        }
                    });
                }
            }
        }
    }

    /// Returns a future that resolves with the arguments of the next
    /// [`notify`](Self::notify) after this call.
    ///
    /// The subscription is made immediately and is dropped together with the
    /// future, so an abandoned wait never fires.
    pub fn wait(&self) -> Notified<A> {
        let slot = Arc::new(FastMutex::new(NotifiedSlot {
            value: None,
            waker: None,
        }));
        let sink = Arc::clone(&slot);
        let subscription = self.subscribe(
            move |args: A| {
                let waker = {
                    let mut slot = sink.lock();
                    slot.value = Some(args);
                    slot.waker.take()
                };
                if let Some(waker) = waker {
                    waker.wake();
                }
            },
            SubscribeMode::SYNCHRONOUS.once(),
        );
        Notified {
            slot,
            _subscription: subscription,
        }
    }
}

impl<A> Default for Notifier<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for Notifier<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.len())
            .finish()
    }
}

struct NotifiedSlot<A> {
    value: Option<A>,
    waker: Option<Waker>,
}

/// Future returned by [`Notifier::wait`].
#[must_use = "futures do nothing unless polled"]
pub struct Notified<A> {
    slot: Arc<FastMutex<NotifiedSlot<A>>>,
    _subscription: Callback<A>,
}

impl<A> Future for Notified<A> {
    type Output = A;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<A> {
        let mut slot = self.slot.lock();
        if let Some(value) = slot.value.take() {
            return Poll::Ready(value);
        }
        match &mut slot.waker {
            Some(w) if w.will_wake(cx.waker()) => {}
            other => *other = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl<A> fmt::Debug for Notified<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notified").finish_non_exhaustive()
    }
}
