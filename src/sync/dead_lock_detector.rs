//! Runtime lock-order verification.
//!
//! Every thread keeps a stack of the lock identities it currently holds. A
//! global, ordered edge set records each observed "held before" relation:
//! acquiring `B` while holding `A` records `(A, B)`. An acquisition that
//! would close a cycle in this graph is a potential deadlock and is
//! reported to the caller; it is never prevented or delayed.
//!
//! The detector is switched on by default in debug builds only; see
//! [`DeadLockDetector::set_enabled`].
//!
//! # Example
//!
//! ```
//! use dispatchkit::sync::{DeadLockDetector, LockId};
//!
//! let a = LockId::next();
//! let b = LockId::next();
//!
//! assert_eq!(DeadLockDetector::lock(a), None);
//! assert_eq!(DeadLockDetector::lock(b), None);
//! assert!(DeadLockDetector::unlock(b));
//! assert!(DeadLockDetector::unlock(a));
//!
//! // Reversed order is reported against the identity already held.
//! assert_eq!(DeadLockDetector::lock(b), None);
//! assert_eq!(DeadLockDetector::lock(a), Some(b));
//! assert!(DeadLockDetector::unlock(b));
//! ```

use super::fast_mutex::{FastMutex, RawFastMutex};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Stable identity of a verified lock.
///
/// Identities are handed out from a process-wide counter and are never
/// reused, so a destroyed lock can never be confused with a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(NonZeroU64);

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

impl LockId {
    const MIN: Self = Self(NonZeroU64::MIN);
    const MAX: Self = Self(NonZeroU64::MAX);

    /// Allocates a fresh identity.
    #[must_use]
    pub fn next() -> Self {
        let raw = NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MAX))
    }

    /// Rebuilds an identity from its raw value, if non-zero.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Returns the raw identity value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock#{}", self.0)
    }
}

static ENABLED: AtomicBool = AtomicBool::new(cfg!(debug_assertions));

// The graph's own mutex is never verified, otherwise every check would
// recurse into itself.
static GRAPH: FastMutex<BTreeSet<(LockId, LockId)>> =
    FastMutex::const_new(RawFastMutex::UNVERIFIED, BTreeSet::new());

thread_local! {
    static HELD: RefCell<SmallVec<[LockId; 8]>> = RefCell::new(SmallVec::new());
}

/// Lock-order verifier.
///
/// All operations act on the calling thread's stack of held identities and
/// the process-wide edge set.
#[derive(Debug, Clone, Copy)]
pub struct DeadLockDetector;

impl DeadLockDetector {
    /// Returns true if instrumented mutexes consult the detector.
    #[must_use]
    pub fn is_enabled() -> bool {
        ENABLED.load(Ordering::Relaxed)
    }

    /// Enables or disables verification for instrumented mutexes.
    ///
    /// Direct calls to [`lock`](Self::lock) and friends keep working either
    /// way; this only controls whether [`FastMutex`] calls them.
    pub fn set_enabled(enabled: bool) {
        ENABLED.store(enabled, Ordering::Relaxed);
    }

    /// Records the acquisition of `id` by the calling thread.
    ///
    /// Returns the identity of a held lock that conflicts with the recorded
    /// order, in which case nothing is recorded and `id` is not pushed.
    /// Re-locking an identity that is already held returns that identity.
    #[must_use]
    pub fn lock(id: LockId) -> Option<LockId> {
        Self::acquire(id, false)
    }

    /// Like [`lock`](Self::lock), but re-locking the most recently acquired
    /// identity is allowed. Re-locking a deeper identity is still a conflict.
    #[must_use]
    pub fn lock_recursive(id: LockId) -> Option<LockId> {
        Self::acquire(id, true)
    }

    /// Records the release of `id`.
    ///
    /// Returns false if `id` is not on top of the calling thread's stack,
    /// including when the stack is empty or another thread holds it.
    #[must_use]
    pub fn unlock(id: LockId) -> bool {
        HELD.try_with(|held| {
            let mut held = held.borrow_mut();
            if held.last() == Some(&id) {
                held.pop();
                true
            } else {
                false
            }
        })
        .unwrap_or(false)
    }

    /// Removes the most recent occurrence of `id` wherever it sits in the
    /// calling thread's stack. Returns false if it is not held.
    pub fn unlock_unordered(id: LockId) -> bool {
        HELD.try_with(|held| {
            let mut held = held.borrow_mut();
            match held.iter().rposition(|&h| h == id) {
                Some(pos) => {
                    held.remove(pos);
                    true
                }
                None => false,
            }
        })
        .unwrap_or(false)
    }

    /// Forgets every edge that mentions `id`. Called when a lock is destroyed.
    pub fn remove_object(id: LockId) {
        GRAPH.lock().retain(|&(before, after)| before != id && after != id);
    }

    /// Empties the calling thread's stack.
    pub fn clear_stack() {
        let _ = HELD.try_with(|held| held.borrow_mut().clear());
    }

    /// Empties the global edge set.
    pub fn clear_graph() {
        GRAPH.lock().clear();
    }

    /// Number of identities held by the calling thread.
    #[must_use]
    pub fn depth() -> usize {
        HELD.try_with(|held| held.borrow().len()).unwrap_or(0)
    }

    /// Number of recorded edges.
    #[must_use]
    pub fn edge_count() -> usize {
        GRAPH.lock().len()
    }

    fn acquire(id: LockId, recursive: bool) -> Option<LockId> {
        HELD.try_with(|held| {
            let mut held = held.borrow_mut();

            if let Some(pos) = held.iter().position(|&h| h == id) {
                if recursive && pos + 1 == held.len() {
                    held.push(id);
                    return None;
                }
                return Some(id);
            }

            if !held.is_empty() {
                let mut graph = GRAPH.lock();
                if let Some(&conflict) = held.iter().find(|&&h| reaches(&graph, id, h)) {
                    return Some(conflict);
                }
                for &h in held.iter() {
                    graph.insert((h, id));
                }
            }
            held.push(id);
            None
        })
        .unwrap_or(None)
    }
}

/// Breadth-first search for a path `from -> .. -> to` in the edge set.
fn reaches(graph: &BTreeSet<(LockId, LockId)>, from: LockId, to: LockId) -> bool {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([from]);
    while let Some(node) = queue.pop_front() {
        for &(_, next) in graph.range((node, LockId::MIN)..=(node, LockId::MAX)) {
            if next == to {
                return true;
            }
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    false
}
