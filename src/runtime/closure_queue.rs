//! FIFO of posted closures.
//!
//! A ring buffer of boxed closures behind a [`FastMutex`]. Any thread may
//! push; only the owning loop drains. When the ring is full it grows by
//! half its size (at least one slot), copying the pending entries in FIFO
//! order, so a push never blocks on the consumer and never loses or
//! duplicates a closure.

use crate::sync::FastMutex;
use crate::tracing_compat::trace;
use std::fmt;

/// A type-erased unit of work posted to a loop.
pub type Closure = Box<dyn FnOnce() + Send + 'static>;

struct Ring {
    slots: Vec<Option<Closure>>,
    head: usize,
    len: usize,
}

impl Ring {
    fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            head: 0,
            len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn push(&mut self, closure: Closure) {
        if self.len == self.capacity() {
            self.grow();
        }
        let tail = (self.head + self.len) % self.capacity();
        debug_assert!(self.slots[tail].is_none());
        self.slots[tail] = Some(closure);
        self.len += 1;
    }

    fn pop(&mut self) -> Option<Closure> {
        if self.len == 0 {
            return None;
        }
        let closure = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        closure
    }

    fn grow(&mut self) {
        let old = self.capacity();
        let new = (old + old.div_ceil(2)).max(old + 1);
        let mut slots = Vec::with_capacity(new);
        for i in 0..self.len {
            slots.push(self.slots[(self.head + i) % old].take());
        }
        slots.resize_with(new, || None);
        self.slots = slots;
        self.head = 0;
        trace!(from = old, to = new, "closure queue grown");
    }
}

/// Multi-producer, single-consumer closure FIFO.
pub struct ClosureQueue {
    ring: FastMutex<Ring>,
}

impl ClosureQueue {
    /// Creates a queue with `capacity` initial slots (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: FastMutex::new(Ring::with_capacity(capacity)),
        }
    }

    /// Appends a closure. Returns the number of pending closures afterwards.
    pub fn push(&self, closure: Closure) -> usize {
        let mut ring = self.ring.lock();
        ring.push(closure);
        ring.len
    }

    /// Removes the oldest closure.
    pub fn pop(&self) -> Option<Closure> {
        self.ring.lock().pop()
    }

    /// Number of pending closures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current slot count of the ring.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }

    /// Runs the closures that are pending when the call starts, oldest first.
    ///
    /// Each closure runs with the queue unlocked, so it may post more work;
    /// that work waits for the next call. Returns how many closures ran.
    pub fn run_all(&self) -> usize {
        let pending = self.len();
        let mut ran = 0;
        while ran < pending {
            let Some(closure) = self.pop() else {
                break;
            };
            closure();
            ran += 1;
        }
        ran
    }

    /// Drops every pending closure without running it. Returns the count.
    pub fn clear(&self) -> usize {
        let drained: Vec<Closure> = {
            let mut ring = self.ring.lock();
            std::iter::from_fn(|| ring.pop()).collect()
        };
        drained.len()
    }
}

impl fmt::Debug for ClosureQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("ClosureQueue")
            .field("len", &ring.len)
            .field("capacity", &ring.capacity())
            .finish()
    }
}
