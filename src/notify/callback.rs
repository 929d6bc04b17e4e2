//! Shared callback handles with weak observers.
//!
//! A [`Callback`] owns a function object behind an `Arc`. Subscription lists
//! store only a [`WeakCallback`], so the subscriber keeps the subscription
//! alive by holding the strong handle and ends it by dropping the handle.

use std::fmt;
use std::sync::{Arc, Weak};

#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicBool, Ordering};

struct CallbackInner<A> {
    func: Box<dyn Fn(A) + Send + Sync>,
    /// Set while the function runs; catches re-entrant and concurrent calls.
    #[cfg(debug_assertions)]
    active: AtomicBool,
}

/// Strong, cloneable handle to a function object.
///
/// # Example
///
/// ```
/// use dispatchkit::notify::Callback;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let hits = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&hits);
/// let cb = Callback::new(move |n: usize| {
///     counter.fetch_add(n, Ordering::SeqCst);
/// });
/// let weak = cb.downgrade();
///
/// cb.call(2);
/// weak.lock().expect("alive").call(3);
/// drop(cb);
///
/// assert!(weak.expired());
/// assert_eq!(hits.load(Ordering::SeqCst), 5);
/// ```
pub struct Callback<A> {
    inner: Arc<CallbackInner<A>>,
}

impl<A> Callback<A> {
    /// Wraps `func` in a new callback.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(CallbackInner {
                func: Box::new(func),
                #[cfg(debug_assertions)]
                active: AtomicBool::new(false),
            }),
        }
    }

    /// Invokes the function.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if this callback is already running on any
    /// thread.
    pub fn call(&self, args: A) {
        #[cfg(debug_assertions)]
        let _active = ActiveGuard::enter(&self.inner.active);
        (self.inner.func)(args);
    }

    /// Creates a weak observer of this callback.
    #[must_use]
    pub fn downgrade(&self) -> WeakCallback<A> {
        WeakCallback {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Returns true if both handles refer to the same function object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of strong handles, this one included.
    #[must_use]
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl<A> Clone for Callback<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for Callback<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("ptr", &Arc::as_ptr(&self.inner))
            .field("strong", &Arc::strong_count(&self.inner))
            .finish()
    }
}

#[cfg(debug_assertions)]
struct ActiveGuard<'a>(&'a AtomicBool);

#[cfg(debug_assertions)]
impl<'a> ActiveGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        assert!(
            !flag.swap(true, Ordering::Acquire),
            "callback invoked while it is already running"
        );
        Self(flag)
    }
}

#[cfg(debug_assertions)]
impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Non-owning observer of a [`Callback`].
///
/// Once the last strong handle is dropped the observer is permanently
/// expired and [`lock`](Self::lock) returns `None`.
pub struct WeakCallback<A> {
    inner: Weak<CallbackInner<A>>,
}

impl<A> WeakCallback<A> {
    /// An observer that is expired from the start.
    #[must_use]
    pub const fn new() -> Self {
        Self { inner: Weak::new() }
    }

    /// Returns true if no strong handle remains.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.inner.strong_count() == 0
    }

    /// Upgrades to a temporary strong handle if the callback is alive.
    #[must_use]
    pub fn lock(&self) -> Option<Callback<A>> {
        self.inner.upgrade().map(|inner| Callback { inner })
    }

    /// Returns true if this observes `strong`.
    #[must_use]
    pub fn observes(&self, strong: &Callback<A>) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Arc::as_ptr(&strong.inner))
    }
}

impl<A> Default for WeakCallback<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for WeakCallback<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for WeakCallback<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakCallback")
            .field("expired", &self.expired())
            .finish()
    }
}

impl<A> From<&Callback<A>> for WeakCallback<A> {
    fn from(cb: &Callback<A>) -> Self {
        cb.downgrade()
    }
}
