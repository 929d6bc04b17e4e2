//! Shared stop/progress state between an initiator and its workers.
//!
//! A [`StopAndProgressSource`] is held by whoever started the work; each
//! worker holds a [`StopAndProgressToken`]. Both point at one shared block:
//!
//! - the stop flag, set by [`request_stop`](StopAndProgressSource::request_stop)
//!   and polled by tokens at their suspension points
//! - the number of live tokens; dropping the last one sends
//!   [`SourceEvent::TokensReleased`] to source subscribers
//! - the major and minor [`Progress`], written by tokens and read by sources
//!
//! Stopping is cooperative and never an error: a token's owner decides how
//! to wind down once it sees the request.

use crate::notify::{Callback, Notified, Notifier, SubscribeMode};
use crate::sync::FastMutex;
use crate::tracing_compat::{debug, trace};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

/// Fractional completion with a human-readable message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    /// Completion in `0.0..=1.0`.
    pub value: f32,
    /// What is being worked on.
    pub message: String,
}

impl Progress {
    /// Creates a progress report, clamping `value` to `0.0..=1.0`.
    pub fn new(value: f32, message: impl Into<String>) -> Self {
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        Self {
            value,
            message: message.into(),
        }
    }
}

/// Notification delivered to source subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceEvent {
    /// A token changed the major or minor progress.
    Progress,
    /// The last token was dropped.
    TokensReleased,
}

struct Shared {
    stop: AtomicBool,
    tokens: AtomicUsize,
    progress: FastMutex<(Progress, Progress)>,
    source_events: Notifier<SourceEvent>,
    token_events: Notifier<()>,
}

impl Shared {
    fn set_progress(&self, major: Option<Progress>, minor: Progress) {
        {
            let mut progress = self.progress.lock();
            if let Some(major) = major {
                progress.0 = major;
            }
            progress.1 = minor;
        }
        self.source_events.notify(SourceEvent::Progress);
    }
}

// ============================================================================
// Source
// ============================================================================

/// Initiator side: requests stop and observes progress.
///
/// Clones share the same state.
///
/// ```
/// use dispatchkit::cancel::StopAndProgressSource;
///
/// let source = StopAndProgressSource::new();
/// let token = source.token();
/// token.set_major_progress(0.5, "halfway");
/// assert_eq!(source.major_progress().message, "halfway");
///
/// source.request_stop();
/// assert!(token.stop_requested());
/// ```
#[derive(Clone)]
pub struct StopAndProgressSource {
    shared: Arc<Shared>,
}

impl StopAndProgressSource {
    /// Creates fresh state: not stopped, no tokens, zero progress.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                stop: AtomicBool::new(false),
                tokens: AtomicUsize::new(0),
                progress: FastMutex::new((Progress::default(), Progress::default())),
                source_events: Notifier::new(),
                token_events: Notifier::new(),
            }),
        }
    }

    /// Hands out a token sharing this state.
    #[must_use]
    pub fn token(&self) -> StopAndProgressToken {
        self.shared.tokens.fetch_add(1, Ordering::AcqRel);
        StopAndProgressToken {
            shared: Some(Arc::clone(&self.shared)),
        }
    }

    /// Asks every token holder to stop.
    ///
    /// Token subscribers are notified on the first request only.
    pub fn request_stop(&self) {
        if self.shared.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(tokens = self.token_count(), "stop requested");
        self.shared.token_events.notify(());
    }

    /// Returns true once stop has been requested.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    /// Latest major progress.
    #[must_use]
    pub fn major_progress(&self) -> Progress {
        self.shared.progress.lock().0.clone()
    }

    /// Latest minor progress.
    #[must_use]
    pub fn minor_progress(&self) -> Progress {
        self.shared.progress.lock().1.clone()
    }

    /// Number of live tokens.
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.shared.tokens.load(Ordering::Acquire)
    }

    /// Subscribes to progress changes and token release.
    #[must_use = "dropping the handle unsubscribes immediately"]
    pub fn subscribe<F>(&self, f: F, mode: SubscribeMode) -> Callback<SourceEvent>
    where
        F: Fn(SourceEvent) + Send + Sync + 'static,
    {
        self.shared.source_events.subscribe(f, mode)
    }
}

impl Default for StopAndProgressSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StopAndProgressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopAndProgressSource")
            .field("stop_requested", &self.stop_requested())
            .field("tokens", &self.token_count())
            .finish()
    }
}

// ============================================================================
// Token
// ============================================================================

/// Worker side: observes stop and reports progress.
///
/// Cloning registers another token holder. A default token is not attached
/// to any source and can never be stopped.
#[derive(Default)]
pub struct StopAndProgressToken {
    shared: Option<Arc<Shared>>,
}

impl StopAndProgressToken {
    /// Returns true once the source requested stop.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|s| s.stop.load(Ordering::Acquire))
    }

    /// Returns true if a source is attached, so a stop may ever arrive.
    #[must_use]
    pub fn stop_possible(&self) -> bool {
        self.shared.is_some()
    }

    /// Sets the major progress and resets the minor progress.
    pub fn set_major_progress(&self, value: f32, message: impl Into<String>) {
        if let Some(shared) = &self.shared {
            shared.set_progress(Some(Progress::new(value, message)), Progress::default());
        }
    }

    /// Sets the minor progress.
    pub fn set_minor_progress(&self, value: f32, message: impl Into<String>) {
        if let Some(shared) = &self.shared {
            shared.set_progress(None, Progress::new(value, message));
        }
    }

    /// Subscribes to the stop request.
    ///
    /// On a detached token the returned handle is never called.
    #[must_use = "dropping the handle unsubscribes immediately"]
    pub fn subscribe<F>(&self, f: F, mode: SubscribeMode) -> Callback<()>
    where
        F: Fn(()) + Send + Sync + 'static,
    {
        match &self.shared {
            Some(shared) => shared.token_events.subscribe(f, mode),
            None => Callback::new(f),
        }
    }

    /// Completes once stop is requested. Never completes on a detached token.
    pub fn stopped(&self) -> Stopped {
        Stopped {
            notified: self.shared.as_ref().map(|s| s.token_events.wait()),
            shared: self.shared.clone(),
        }
    }
}

impl Clone for StopAndProgressToken {
    fn clone(&self) -> Self {
        if let Some(shared) = &self.shared {
            shared.tokens.fetch_add(1, Ordering::AcqRel);
        }
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for StopAndProgressToken {
    fn drop(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        if shared.tokens.fetch_sub(1, Ordering::AcqRel) == 1 {
            trace!("last stop token released");
            shared.source_events.notify(SourceEvent::TokensReleased);
        }
    }
}

impl fmt::Debug for StopAndProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopAndProgressToken")
            .field("attached", &self.stop_possible())
            .field("stop_requested", &self.stop_requested())
            .finish()
    }
}

/// Future returned by [`StopAndProgressToken::stopped`].
#[must_use = "futures do nothing unless polled"]
pub struct Stopped {
    notified: Option<Notified<()>>,
    shared: Option<Arc<Shared>>,
}

impl Future for Stopped {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self
            .shared
            .as_ref()
            .is_some_and(|s| s.stop.load(Ordering::Acquire))
        {
            return Poll::Ready(());
        }
        match self.notified.as_mut() {
            Some(notified) => Pin::new(notified).poll(cx),
            None => Poll::Pending,
        }
    }
}

impl fmt::Debug for Stopped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stopped").finish_non_exhaustive()
    }
}
