//! Per-thread cooperative event loop.
//!
//! Each thread owns at most one [`Loop`], created on first use by
//! [`Loop::local`]. A loop cycles through three phases:
//!
//! ```text
//!   idle ──► waiting ──► draining ──► idle
//!            (poller,     (timers, closures,
//!             timeout)     sockets, render)
//! ```
//!
//! The wait blocks on the platform poller with a timeout clamped to the
//! earliest timer, the next render frame and [`LoopConfig::max_wait`].
//! Producers on any thread post closures or timers and wake the poller.
//! Draining only ever happens on the owning thread, and no internal lock is
//! held while user code runs, so a closure may post, subscribe or even call
//! [`Loop::resume_once`] recursively.
//!
//! # Singletons
//!
//! - [`Loop::local`]: the calling thread's loop
//! - [`Loop::main`]: the loop of the first thread that asks for it; call it
//!   from the application's primary thread before anything else does
//! - [`Loop::timer`]: a loop running on a dedicated background thread,
//!   started on first request after [`Loop::main`] exists

use super::async_result::AsyncResult;
use super::closure_queue::{Closure, ClosureQueue};
use super::config::LoopConfig;
use super::timer::{TimerHandle, TimerQueue};
use crate::cancel::{StopAndProgressSource, StopAndProgressToken};
use crate::error::{Error, ErrorKind, TaskError};
use crate::notify::{Callback, WeakCallback};
use crate::sync::FastMutex;
use crate::tracing_compat::{debug, error, trace};
use polling::{Event, Poller};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

#[cfg(unix)]
use crate::error::Result;
#[cfg(unix)]
use crate::tracing_compat::warn;
#[cfg(unix)]
use std::collections::HashMap;
#[cfg(unix)]
use std::os::unix::io::RawFd;

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static LOCAL: Loop = Loop::for_current_thread();
}

static MAIN: OnceLock<Loop> = OnceLock::new();
static TIMER: OnceLock<TimerThread> = OnceLock::new();

struct TimerThread {
    event_loop: Loop,
    stop: StopAndProgressSource,
    join: FastMutex<Option<JoinHandle<()>>>,
}

/// Readiness reported for a registered socket.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SocketEvents {
    /// The descriptor is readable.
    pub readable: bool,
    /// The descriptor is writable.
    pub writable: bool,
}

#[cfg(unix)]
impl SocketEvents {
    /// Read readiness only.
    pub const READABLE: Self = Self {
        readable: true,
        writable: false,
    };
    /// Write readiness only.
    pub const WRITABLE: Self = Self {
        readable: false,
        writable: true,
    };
    /// Both directions.
    pub const BOTH: Self = Self {
        readable: true,
        writable: true,
    };

    fn to_event(self, fd: RawFd) -> Event {
        let key = fd as usize;
        match (self.readable, self.writable) {
            (true, true) => Event::all(key),
            (true, false) => Event::readable(key),
            (false, true) => Event::writable(key),
            (false, false) => Event::none(key),
        }
    }
}

#[cfg(unix)]
struct SocketEntry {
    interest: SocketEvents,
    callback: Callback<(RawFd, SocketEvents)>,
}

struct RenderState {
    subscribers: Vec<WeakCallback<Instant>>,
    interval: Duration,
    next_frame: Instant,
}

impl RenderState {
    fn has_subscribers(&mut self) -> bool {
        self.subscribers.retain(|s| !s.expired());
        !self.subscribers.is_empty()
    }
}

struct LoopInner {
    id: u64,
    thread: ThreadId,
    is_main: AtomicBool,
    config: LoopConfig,
    closures: ClosureQueue,
    timers: TimerQueue,
    poller: Poller,
    #[cfg(unix)]
    sockets: FastMutex<HashMap<RawFd, SocketEntry>>,
    render: FastMutex<RenderState>,
    exit_code: FastMutex<Option<i32>>,
}

impl Drop for LoopInner {
    fn drop(&mut self) {
        let closures = self.closures.clear();
        let timers = self.timers.clear();
        debug!(
            loop_id = self.id,
            discarded_closures = closures,
            discarded_timers = timers,
            "loop torn down"
        );
    }
}

/// Handle to a thread's event loop.
///
/// Handles are cheap to clone and may be sent to other threads to post work.
/// Draining ([`resume`](Self::resume), [`resume_once`](Self::resume_once))
/// is only allowed on the owning thread.
#[derive(Clone)]
pub struct Loop {
    inner: Arc<LoopInner>,
}

impl Loop {
    fn for_current_thread() -> Self {
        let config = LoopConfig::current();
        let poller = match Poller::new() {
            Ok(poller) => poller,
            Err(err) => {
                error!(%err, "cannot create the event loop's poller");
                panic!("cannot create the event loop's poller: {err}");
            }
        };
        let id = NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let interval = config.frame_interval();
        debug!(loop_id = id, thread = ?thread::current().name(), "loop created");
        Self {
            inner: Arc::new(LoopInner {
                id,
                thread: thread::current().id(),
                is_main: AtomicBool::new(false),
                closures: ClosureQueue::new(config.closure_queue_capacity),
                timers: TimerQueue::new(),
                poller,
                #[cfg(unix)]
                sockets: FastMutex::new(HashMap::new()),
                render: FastMutex::new(RenderState {
                    subscribers: Vec::new(),
                    interval,
                    next_frame: now,
                }),
                exit_code: FastMutex::new(None),
                config,
            }),
        }
    }

    /// The calling thread's loop, created on first use.
    ///
    /// # Panics
    ///
    /// Panics if called while the thread's locals are being destroyed.
    #[must_use]
    pub fn local() -> Self {
        LOCAL.with(Self::clone)
    }

    /// The application's main loop.
    ///
    /// The first call decides which thread is the main thread: it must come
    /// from the thread that will run the main loop.
    #[must_use]
    pub fn main() -> Self {
        MAIN.get_or_init(|| {
            let local = Self::local();
            local.inner.is_main.store(true, Ordering::Release);
            debug!(loop_id = local.inner.id, "main loop selected");
            local
        })
        .clone()
    }

    /// The loop of the dedicated timer thread, started on first use.
    ///
    /// Ensures [`Loop::main`] exists first.
    ///
    /// # Panics
    ///
    /// Panics if the timer thread cannot be spawned.
    #[must_use]
    pub fn timer() -> Self {
        TIMER
            .get_or_init(|| {
                let _ = Self::main();
                Self::spawn_timer_thread()
            })
            .event_loop
            .clone()
    }

    fn spawn_timer_thread() -> TimerThread {
        let name = LoopConfig::current().timer_thread_name;
        let stop = StopAndProgressSource::new();
        let token = stop.token();
        let (tx, rx) = mpsc::sync_channel(1);
        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            let local = Self::local();
            if tx.send(local.clone()).is_err() {
                return;
            }
            debug!(loop_id = local.inner.id, "timer thread running");
            let code = local.resume(Some(&token));
            debug!(loop_id = local.inner.id, code, "timer thread stopped");
        });
        let join = match spawned {
            Ok(join) => join,
            Err(err) => {
                error!(%err, thread = %name, "cannot spawn the timer thread");
                panic!("cannot spawn the timer thread: {err}");
            }
        };
        let Ok(event_loop) = rx.recv() else {
            error!(thread = %name, "timer thread exited before reporting its loop");
            panic!("timer thread exited before reporting its loop");
        };
        TimerThread {
            event_loop,
            stop,
            join: FastMutex::new(Some(join)),
        }
    }

    /// Stops the timer thread, if it was started, and waits for it to exit.
    ///
    /// Work still queued on the timer loop is dropped with it. The timer
    /// loop is not restarted afterwards.
    pub fn shutdown_timer() {
        let Some(timer) = TIMER.get() else {
            return;
        };
        timer.stop.request_stop();
        timer.event_loop.wake();
        let join = timer.join.lock().take();
        if let Some(join) = join {
            if join.join().is_err() {
                error!("timer thread panicked");
            }
        }
    }

    /// Unique identifier of this loop.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns true if the calling thread owns this loop.
    #[must_use]
    pub fn on_thread(&self) -> bool {
        thread::current().id() == self.inner.thread
    }

    /// Returns true if this is the main loop.
    #[must_use]
    pub fn is_main(&self) -> bool {
        self.inner.is_main.load(Ordering::Acquire)
    }

    /// Configuration captured when the loop was created.
    #[must_use]
    pub fn config(&self) -> &LoopConfig {
        &self.inner.config
    }

    /// Interrupts a blocking wait so the loop drains promptly.
    pub fn wake(&self) {
        if let Err(err) = self.inner.poller.notify() {
            error!(loop_id = self.inner.id, %err, "cannot wake the loop");
        }
    }

    /// Posts `f` to run on this loop and wakes it.
    pub fn post_function<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.closures.push(Box::new(f) as Closure);
        self.wake();
    }

    /// Posts `f` without waking the loop.
    ///
    /// The closure runs at the loop's next natural wake-up, at the latest
    /// after [`LoopConfig::max_wait`].
    pub fn post_function_without_wake<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.closures.push(Box::new(f) as Closure);
    }

    /// Posts `f` and returns a handle to its result.
    ///
    /// A panic inside `f` is captured into the result.
    pub fn async_function<F, R>(&self, f: F) -> AsyncResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (result, promise) = AsyncResult::pair();
        self.post_function(move || {
            let value =
                catch_unwind(AssertUnwindSafe(f)).map_err(|p| TaskError::from_panic(p.as_ref()));
            promise.complete(value);
        });
        result
    }

    /// Runs `f` once at or after `deadline`. Dropping the handle cancels it.
    pub fn delay_function<F>(&self, deadline: Instant, f: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let (handle, was_earliest) = self.inner.timers.delay_function(deadline, f);
        if was_earliest {
            self.wake();
        }
        handle
    }

    /// Runs `f` every `period`, first at `start` (default: now).
    pub fn repeat_function<F>(&self, period: Duration, start: Option<Instant>, f: F) -> TimerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let start = start.unwrap_or_else(Instant::now);
        let (handle, was_earliest) = self.inner.timers.repeat_function(period, start, f);
        if was_earliest {
            self.wake();
        }
        handle
    }

    /// Subscribes `f` to render ticks, delivered with the frame time at most
    /// [`maximum_frame_rate`](Self::set_maximum_frame_rate) times a second.
    #[must_use = "dropping the handle unsubscribes immediately"]
    pub fn subscribe_render<F>(&self, f: F) -> Callback<Instant>
    where
        F: Fn(Instant) + Send + Sync + 'static,
    {
        let callback = Callback::new(f);
        self.inner.render.lock().subscribers.push(callback.downgrade());
        self.wake();
        callback
    }

    /// Changes the render tick rate.
    pub fn set_maximum_frame_rate(&self, frame_rate: f64) {
        let mut config = LoopConfig {
            maximum_frame_rate: frame_rate,
            ..LoopConfig::default()
        };
        config.normalize();
        self.inner.render.lock().interval = config.frame_interval();
    }

    /// Registers `f` for readiness events on `fd`.
    ///
    /// The registration is re-armed after every event until
    /// [`remove_socket`](Self::remove_socket). At most one callback may be
    /// registered per descriptor.
    #[cfg(unix)]
    pub fn add_socket<F>(&self, fd: RawFd, interest: SocketEvents, f: F) -> Result<()>
    where
        F: Fn((RawFd, SocketEvents)) + Send + Sync + 'static,
    {
        let mut sockets = self.inner.sockets.lock();
        if sockets.contains_key(&fd) {
            warn!(loop_id = self.inner.id, fd, "socket already registered");
            return Err(Error::new(ErrorKind::Io)
                .with_message(format!("descriptor {fd} is already registered")));
        }
        self.inner
            .poller
            .add(fd, interest.to_event(fd))
            .map_err(|e| Error::io("cannot register socket", e))?;
        sockets.insert(
            fd,
            SocketEntry {
                interest,
                callback: Callback::new(f),
            },
        );
        Ok(())
    }

    /// Removes the registration of `fd`.
    #[cfg(unix)]
    pub fn remove_socket(&self, fd: RawFd) -> Result<()> {
        let removed = self.inner.sockets.lock().remove(&fd);
        if removed.is_none() {
            return Err(Error::new(ErrorKind::Io)
                .with_message(format!("descriptor {fd} is not registered")));
        }
        self.inner
            .poller
            .delete(fd)
            .map_err(|e| Error::io("cannot deregister socket", e))
    }

    /// Asks [`resume`](Self::resume) to return `code` and wakes the loop.
    pub fn exit(&self, code: i32) {
        *self.inner.exit_code.lock() = Some(code);
        self.wake();
    }

    /// Returns true while timers, closures, sockets or render subscribers
    /// remain.
    #[must_use]
    pub fn has_work(&self) -> bool {
        if !self.inner.closures.is_empty() || !self.inner.timers.is_empty() {
            return true;
        }
        #[cfg(unix)]
        if !self.inner.sockets.lock().is_empty() {
            return true;
        }
        self.inner.render.lock().has_subscribers()
    }

    /// Number of closures waiting to run.
    #[must_use]
    pub fn pending_closures(&self) -> usize {
        self.inner.closures.len()
    }

    /// Runs wait/drain cycles until [`exit`](Self::exit) is called, or:
    ///
    /// - with a stop token, until stop is requested (returns 0);
    /// - without one, until [`has_work`](Self::has_work) is false (returns 0).
    ///
    /// Returns the exit code.
    pub fn resume(&self, stop: Option<&StopAndProgressToken>) -> i32 {
        self.assert_on_thread("resume");
        debug!(loop_id = self.inner.id, "loop resumed");
        let code = loop {
            if let Some(code) = self.inner.exit_code.lock().take() {
                break code;
            }
            let finished = match stop {
                Some(token) => token.stop_requested(),
                None => !self.has_work(),
            };
            if finished {
                break 0;
            }
            self.resume_once(true);
        };
        debug!(loop_id = self.inner.id, code, "loop finished");
        code
    }

    /// Performs one wait/drain cycle.
    ///
    /// With `block`, waits until woken, the next timer or frame is due, or
    /// [`LoopConfig::max_wait`] passes; without it, only collects events that
    /// are already pending. Safe to call from inside work run by this loop.
    pub fn resume_once(&self, block: bool) {
        self.assert_on_thread("resume_once");

        let timeout = if block && self.inner.closures.is_empty() {
            self.wait_timeout(Instant::now())
        } else {
            Duration::ZERO
        };

        let mut events = Vec::new();
        if let Err(err) = self.inner.poller.wait(&mut events, Some(timeout)) {
            if err.kind() != std::io::ErrorKind::Interrupted {
                error!(loop_id = self.inner.id, %err, "poller wait failed");
            }
        }

        let now = Instant::now();
        let timers = self.inner.timers.run_all(now);
        let closures = self.inner.closures.run_all();
        #[cfg(unix)]
        self.dispatch_sockets(&events);
        self.render(now);
        trace!(loop_id = self.inner.id, timers, closures, events = events.len(), "drained");
    }

    fn assert_on_thread(&self, operation: &str) {
        if cfg!(debug_assertions) && !self.on_thread() {
            let err = Error::new(ErrorKind::LoopNotOnThread).with_message(format!(
                "Loop::{operation} called for loop {} from a foreign thread",
                self.inner.id
            ));
            panic!("{err}");
        }
    }

    fn wait_timeout(&self, now: Instant) -> Duration {
        let mut timeout = self.inner.config.max_wait;
        if let Some(deadline) = self.inner.timers.current_deadline() {
            timeout = timeout.min(deadline.saturating_duration_since(now));
        }
        let mut render = self.inner.render.lock();
        if render.has_subscribers() {
            timeout = timeout.min(render.next_frame.saturating_duration_since(now));
        }
        timeout
    }

    #[cfg(unix)]
    fn dispatch_sockets(&self, events: &[Event]) {
        for event in events {
            let fd = event.key as RawFd;
            let callback = self.inner.sockets.lock().get(&fd).map(|e| e.callback.clone());
            let Some(callback) = callback else {
                continue;
            };
            callback.call((
                fd,
                SocketEvents {
                    readable: event.readable,
                    writable: event.writable,
                },
            ));

            let sockets = self.inner.sockets.lock();
            if let Some(entry) = sockets.get(&fd) {
                if let Err(err) = self.inner.poller.modify(fd, entry.interest.to_event(fd)) {
                    error!(loop_id = self.inner.id, fd, %err, "cannot re-arm socket");
                }
            }
        }
    }

    fn render(&self, now: Instant) {
        let due: Vec<Callback<Instant>> = {
            let mut render = self.inner.render.lock();
            if now < render.next_frame || !render.has_subscribers() {
                return;
            }
            render.next_frame = now + render.interval;
            render.subscribers.iter().filter_map(WeakCallback::lock).collect()
        };
        for callback in &due {
            callback.call(now);
        }
    }
}

impl PartialEq for Loop {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Loop {}

impl fmt::Debug for Loop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loop")
            .field("id", &self.inner.id)
            .field("thread", &self.inner.thread)
            .field("is_main", &self.is_main())
            .field("pending_closures", &self.inner.closures.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::run_local_until;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn local_is_per_thread_and_stable() {
        init_test("local_is_per_thread_and_stable");
        let a = Loop::local();
        let b = Loop::local();
        crate::assert_with_log!(a == b, "same loop", a.id(), b.id());
        let other = thread::spawn(|| Loop::local().id()).join().expect("thread panicked");
        crate::assert_with_log!(other != a.id(), "distinct per thread", "different", other);
        crate::assert_with_log!(a.on_thread(), "on_thread", true, a.on_thread());
        crate::test_complete!("local_is_per_thread_and_stable");
    }

    #[test]
    fn posted_closure_runs_on_next_cycle() {
        init_test("posted_closure_runs_on_next_cycle");
        let lp = Loop::local();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let remote = lp.clone();
        thread::spawn(move || {
            remote.post_function(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
        })
        .join()
        .expect("poster panicked");
        crate::assert_with_log!(hits.load(Ordering::SeqCst) == 0, "not yet", 0, hits.load(Ordering::SeqCst));
        lp.resume_once(true);
        crate::assert_with_log!(hits.load(Ordering::SeqCst) == 1, "ran once", 1, hits.load(Ordering::SeqCst));
        crate::test_complete!("posted_closure_runs_on_next_cycle");
    }

    #[test]
    fn closures_keep_fifo_order() {
        init_test("closures_keep_fifo_order");
        let lp = Loop::local();
        let log = Arc::new(Mutex::new(Vec::new()));
        for n in 0..5 {
            let log = Arc::clone(&log);
            lp.post_function_without_wake(move || log.lock().push(n));
        }
        lp.resume_once(false);
        let seen = log.lock().clone();
        crate::assert_with_log!(seen == vec![0, 1, 2, 3, 4], "fifo", vec![0, 1, 2, 3, 4], seen);
        crate::test_complete!("closures_keep_fifo_order");
    }

    #[test]
    fn delay_function_respects_deadline() {
        init_test("delay_function_respects_deadline");
        let lp = Loop::local();
        let start = Instant::now();
        let fired_at = Arc::new(Mutex::new(None));
        let f = Arc::clone(&fired_at);
        let _handle = lp.delay_function(start + Duration::from_millis(100), move || {
            *f.lock() = Some(Instant::now());
        });
        let done = run_local_until(Duration::from_secs(2), || fired_at.lock().is_some());
        crate::assert_with_log!(done, "fired", true, done);
        let at = fired_at.lock().expect("fired");
        let elapsed = at.duration_since(start);
        crate::assert_with_log!(
            elapsed >= Duration::from_millis(100),
            "not early",
            ">= 100ms",
            elapsed
        );
        crate::test_complete!("delay_function_respects_deadline");
    }

    #[test]
    fn async_function_delivers_value_and_panics() {
        init_test("async_function_delivers_value_and_panics");
        let lp = Loop::local();
        let mut ok = lp.async_function(|| 6 * 7);
        let mut bad = lp.async_function(|| -> u8 { panic!("refused") });
        lp.resume_once(false);
        let ok = ok.try_take();
        crate::assert_with_log!(ok == Some(Ok(42)), "value", "Some(Ok(42))", ok);
        let bad = bad.try_take();
        crate::assert_with_log!(
            bad == Some(Err(TaskError::Panicked("refused".to_string()))),
            "panic captured",
            "Panicked(refused)",
            bad
        );
        crate::test_complete!("async_function_delivers_value_and_panics");
    }

    #[test]
    fn resume_returns_exit_code() {
        init_test("resume_returns_exit_code");
        let lp = Loop::local();
        let inner = lp.clone();
        lp.post_function(move || inner.exit(3));
        let code = lp.resume(None);
        crate::assert_with_log!(code == 3, "exit code", 3, code);
        crate::test_complete!("resume_returns_exit_code");
    }

    #[test]
    fn resume_without_token_stops_when_idle() {
        init_test("resume_without_token_stops_when_idle");
        let lp = Loop::local();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _timer = lp.delay_function(Instant::now() + Duration::from_millis(20), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let code = lp.resume(None);
        crate::assert_with_log!(code == 0, "code", 0, code);
        crate::assert_with_log!(hits.load(Ordering::SeqCst) == 1, "timer ran", 1, hits.load(Ordering::SeqCst));
        crate::assert_with_log!(!lp.has_work(), "idle", false, lp.has_work());
        crate::test_complete!("resume_without_token_stops_when_idle");
    }

    #[test]
    fn resume_with_token_stops_on_request() {
        init_test("resume_with_token_stops_on_request");
        let lp = Loop::local();
        let source = StopAndProgressSource::new();
        let token = source.token();
        let remote = lp.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            source.request_stop();
            remote.wake();
        });
        let code = lp.resume(Some(&token));
        stopper.join().expect("stopper panicked");
        crate::assert_with_log!(code == 0, "code", 0, code);
        crate::assert_with_log!(token.stop_requested(), "stopped", true, token.stop_requested());
        crate::test_complete!("resume_with_token_stops_on_request");
    }

    #[test]
    fn nested_resume_once_is_safe() {
        init_test("nested_resume_once_is_safe");
        let lp = Loop::local();
        let log = Arc::new(Mutex::new(Vec::new()));
        let l1 = Arc::clone(&log);
        let l2 = Arc::clone(&log);
        let inner = lp.clone();
        lp.post_function(move || {
            l1.lock().push("outer-start");
            let l2 = Arc::clone(&l2);
            inner.post_function(move || l2.lock().push("nested"));
            inner.resume_once(false);
            l1.lock().push("outer-end");
        });
        lp.resume_once(false);
        let seen = log.lock().clone();
        crate::assert_with_log!(
            seen == ["outer-start", "nested", "outer-end"],
            "nested drain",
            ["outer-start", "nested", "outer-end"],
            seen
        );
        crate::test_complete!("nested_resume_once_is_safe");
    }

    #[test]
    fn repeating_handler_may_drain_its_own_loop() {
        init_test("repeating_handler_may_drain_its_own_loop");
        let lp = Loop::local();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let inner = lp.clone();
        let _handle = lp.repeat_function(Duration::from_millis(5), None, move || {
            h.fetch_add(1, Ordering::SeqCst);
            // Overrun the period, then drain recursively.
            thread::sleep(Duration::from_millis(12));
            inner.resume_once(false);
        });
        let ticked = run_local_until(Duration::from_secs(2), || hits.load(Ordering::SeqCst) >= 3);
        crate::assert_with_log!(ticked, "kept ticking", ">= 3", hits.load(Ordering::SeqCst));
        crate::test_complete!("repeating_handler_may_drain_its_own_loop");
    }

    #[test]
    fn render_subscribers_receive_ticks_until_dropped() {
        init_test("render_subscribers_receive_ticks_until_dropped");
        let lp = Loop::local();
        lp.set_maximum_frame_rate(200.0);
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&ticks);
        let handle = lp.subscribe_render(move |_frame| {
            t.fetch_add(1, Ordering::SeqCst);
        });
        let ticked = run_local_until(Duration::from_secs(2), || ticks.load(Ordering::SeqCst) >= 2);
        crate::assert_with_log!(ticked, "ticks", ">= 2", ticks.load(Ordering::SeqCst));
        drop(handle);
        let after = ticks.load(Ordering::SeqCst);
        lp.resume_once(false);
        crate::assert_with_log!(
            ticks.load(Ordering::SeqCst) == after,
            "no ticks after drop",
            after,
            ticks.load(Ordering::SeqCst)
        );
        crate::test_complete!("render_subscribers_receive_ticks_until_dropped");
    }

    #[cfg(debug_assertions)]
    #[test]
    fn draining_from_another_thread_panics() {
        init_test("draining_from_another_thread_panics");
        let lp = Loop::local();
        let outcome = thread::spawn(move || lp.resume_once(false)).join();
        crate::assert_with_log!(outcome.is_err(), "foreign drain rejected", "Err", outcome.is_ok());
        crate::test_complete!("draining_from_another_thread_panics");
    }

    #[cfg(unix)]
    #[test]
    fn socket_readiness_is_dispatched() {
        use std::io::Write;
        use std::os::unix::io::AsRawFd;
        use std::os::unix::net::UnixStream;

        init_test("socket_readiness_is_dispatched");
        let lp = Loop::local();
        let (mut tx, rx) = UnixStream::pair().expect("socket pair");
        rx.set_nonblocking(true).expect("nonblocking");
        let fd = rx.as_raw_fd();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        lp.add_socket(fd, SocketEvents::READABLE, move |(fd, ev)| s.lock().push((fd, ev)))
            .expect("register");
        let duplicate = lp.add_socket(fd, SocketEvents::READABLE, |_| {});
        crate::assert_with_log!(duplicate.is_err(), "one callback per fd", true, duplicate.is_err());

        tx.write_all(b"x").expect("write");
        let got = run_local_until(Duration::from_secs(2), || !seen.lock().is_empty());
        crate::assert_with_log!(got, "readable event", true, got);
        let first = seen.lock()[0];
        crate::assert_with_log!(first.0 == fd && first.1.readable, "event", fd, first);

        crate::test_section!("deregister");
        lp.remove_socket(fd).expect("deregister");
        let again = lp.remove_socket(fd);
        crate::assert_with_log!(again.is_err(), "already removed", true, again.is_err());
        crate::test_complete!("socket_readiness_is_dispatched");
    }
}
