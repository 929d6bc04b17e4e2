//! Deadline-ordered timer queue.
//!
//! Entries live in a min-heap keyed by `(deadline, insertion sequence)`, so
//! timers with equal deadlines fire in the order they were scheduled. The
//! queue holds only a weak reference to each callback; the caller keeps the
//! strong [`TimerHandle`] and cancels by dropping it. Cancelled entries are
//! compacted away lazily, at the latest when they outnumber the live ones.
//!
//! A repeating timer leaves the heap while its callback runs and is put
//! back afterwards, so a handler that drains its loop recursively never
//! sees itself due again.

use crate::notify::{Callback, WeakCallback};
use crate::sync::FastMutex;
use crate::tracing_compat::trace;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::{Duration, Instant};

/// Keeps a scheduled timer alive. Dropping it cancels the timer.
#[must_use = "dropping the handle cancels the timer"]
#[derive(Debug)]
pub struct TimerHandle {
    callback: Callback<()>,
}

impl TimerHandle {
    /// Cancels the timer. Equivalent to dropping the handle.
    pub fn cancel(self) {}
}

struct TimerEntry {
    deadline: Instant,
    period: Option<Duration>,
    seq: u64,
    callback: WeakCallback<()>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Heap size below which cancelled entries are never compacted.
const COMPACT_MIN: usize = 64;

#[derive(Default)]
struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
    /// Heap size that triggers the next compaction on insert.
    compact_at: usize,
}

impl TimerHeap {
    fn insert(&mut self, deadline: Instant, period: Option<Duration>, callback: &Callback<()>) -> bool {
        let seq = self.next_seq;
        self.push(TimerEntry {
            deadline,
            period,
            seq,
            callback: callback.downgrade(),
        });
        self.heap.peek().is_some_and(|top| top.seq == seq)
    }

    fn push(&mut self, mut entry: TimerEntry) {
        entry.seq = self.next_seq;
        self.next_seq += 1;
        if self.heap.len() >= self.compact_at.max(COMPACT_MIN) {
            self.compact();
        }
        self.heap.push(entry);
    }

    /// Drops every cancelled entry.
    fn compact(&mut self) {
        let before = self.heap.len();
        self.heap.retain(|e| !e.callback.expired());
        self.compact_at = self.heap.len() * 2;
        if before != self.heap.len() {
            trace!(removed = before - self.heap.len(), live = self.heap.len(), "timer heap compacted");
        }
    }

    fn purge_expired_top(&mut self) {
        while self.heap.peek().is_some_and(|top| top.callback.expired()) {
            self.heap.pop();
        }
    }
}

/// Timers of one event loop.
#[derive(Default)]
pub struct TimerQueue {
    timers: FastMutex<TimerHeap>,
}

impl TimerQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `f` to run once at or after `deadline`.
    ///
    /// Returns the handle and whether this timer is now the earliest one,
    /// in which case a sleeping loop must be woken to shorten its wait.
    pub fn delay_function<F>(&self, deadline: Instant, f: F) -> (TimerHandle, bool)
    where
        F: FnOnce() + Send + 'static,
    {
        let slot = FastMutex::new(Some(f));
        let callback = Callback::new(move |()| {
            let f = slot.lock().take();
            if let Some(f) = f {
                f();
            }
        });
        let was_earliest = self.timers.lock().insert(deadline, None, &callback);
        (TimerHandle { callback }, was_earliest)
    }

    /// Schedules `f` to run at `start` and then every `period`.
    ///
    /// A repetition that falls behind is rescheduled to
    /// `max(previous deadline + period, now)`, so an overrunning handler
    /// causes at most one catch-up run instead of a burst.
    pub fn repeat_function<F>(&self, period: Duration, start: Instant, f: F) -> (TimerHandle, bool)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback = Callback::new(move |()| f());
        let was_earliest = self.timers.lock().insert(start, Some(period), &callback);
        (TimerHandle { callback }, was_earliest)
    }

    /// Runs every live timer whose deadline is `<= now`, earliest first.
    ///
    /// Callbacks run with the queue unlocked. A repeating timer is
    /// rescheduled only after its callback returns. Returns how many ran.
    pub fn run_all(&self, now: Instant) -> usize {
        let due: SmallVec<[(Callback<()>, TimerEntry); 8]> = {
            let mut timers = self.timers.lock();
            let mut due = SmallVec::new();
            while timers.heap.peek().is_some_and(|top| top.deadline <= now) {
                let Some(entry) = timers.heap.pop() else {
                    break;
                };
                if let Some(callback) = entry.callback.lock() {
                    due.push((callback, entry));
                }
            }
            due
        };

        if !due.is_empty() {
            trace!(count = due.len(), "running due timers");
        }
        let ran = due.len();
        for (callback, mut entry) in due {
            callback.call(());
            let Some(period) = entry.period else {
                continue;
            };
            drop(callback);
            if entry.callback.expired() {
                continue;
            }
            if let Some(next) = entry.deadline.checked_add(period) {
                entry.deadline = next.max(now);
                self.timers.lock().push(entry);
            }
        }
        ran
    }

    /// Deadline of the earliest live timer.
    #[must_use]
    pub fn current_deadline(&self) -> Option<Instant> {
        let mut timers = self.timers.lock();
        timers.purge_expired_top();
        timers.heap.peek().map(|top| top.deadline)
    }

    /// Number of live timers. Compacts away cancelled entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut timers = self.timers.lock();
        timers.compact();
        timers.heap.len()
    }

    /// Returns true if no live timer remains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let mut timers = self.timers.lock();
        timers.purge_expired_top();
        timers.heap.is_empty()
    }

    /// Forgets every timer. Returns how many live timers were discarded.
    pub fn clear(&self) -> usize {
        let mut timers = self.timers.lock();
        let live = timers.heap.iter().filter(|e| !e.callback.expired()).count();
        timers.heap.clear();
        live
    }
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("len", &self.len())
            .finish()
    }
}
