//! A small blocking mutex tuned for the uncontended path.
//!
//! The lock word has three states:
//!
//! | Value | Meaning |
//! |-------|---------|
//! | 0 | unlocked |
//! | 1 | locked, no waiters |
//! | 2 | locked, waiters may be parked |
//!
//! Locking and unlocking without contention is a single atomic operation.
//! Only a thread that finds the word non-zero parks on the slow path, and
//! only an unlock that observes state 2 touches the parker.
//!
//! Instrumented mutexes report every acquisition to the
//! [`DeadLockDetector`] while it is enabled and panic on a lock-order
//! conflict.

#![allow(unsafe_code)]

use super::dead_lock_detector::{DeadLockDetector, LockId};
use crate::error::{Error, ErrorKind};
use crate::tracing_compat::warn;
use parking_lot::lock_api::{self, GuardNoSend};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

/// Spins before parking on the slow path.
const SPIN_LIMIT: u32 = 64;

/// The raw lock behind [`FastMutex`].
#[derive(Debug)]
pub struct RawFastMutex {
    state: AtomicU32,
    /// 0 until the first verified lock assigns an identity.
    id: AtomicU64,
    verify: bool,
    parker: Mutex<()>,
    wakeup: Condvar,
}

impl RawFastMutex {
    /// An unlocked mutex that is never reported to the lock-order verifier.
    #[allow(clippy::declare_interior_mutable_const)]
    pub const UNVERIFIED: Self = Self::with_verification(false);

    const fn with_verification(verify: bool) -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
            id: AtomicU64::new(0),
            verify,
            parker: parking_lot::const_mutex(()),
            wakeup: Condvar::new(),
        }
    }

    /// Returns the verifier identity, assigning one on first use.
    pub fn lock_id(&self) -> LockId {
        if let Some(id) = LockId::from_raw(self.id.load(Ordering::Acquire)) {
            return id;
        }
        let fresh = LockId::next();
        match self
            .id
            .compare_exchange(0, fresh.get(), Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => fresh,
            Err(existing) => LockId::from_raw(existing).unwrap_or(fresh),
        }
    }

    fn verifying(&self) -> bool {
        self.verify && DeadLockDetector::is_enabled()
    }

    fn lock_contended(&self) {
        for _ in 0..SPIN_LIMIT {
            if self.state.load(Ordering::Relaxed) == UNLOCKED
                && self
                    .state
                    .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return;
            }
            std::hint::spin_loop();
        }

        let mut parked = self.parker.lock();
        // Whoever wins here holds the lock in the contended state, so its
        // unlock will always wake the next waiter.
        while self.state.swap(CONTENDED, Ordering::Acquire) != UNLOCKED {
            self.wakeup.wait(&mut parked);
        }
    }
}

// SAFETY: `state` provides mutual exclusion: only the thread that moves it
// from UNLOCKED to LOCKED/CONTENDED returns from `lock`/`try_lock`, and the
// lock is only released by `unlock`, which lock_api calls from the owner.
unsafe impl lock_api::RawMutex for RawFastMutex {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::with_verification(true);

    // The verifier's held stack is per thread, so a guard must be
    // released on the thread that acquired it.
    type GuardMarker = GuardNoSend;

    fn lock(&self) {
        if self.verifying() {
            let id = self.lock_id();
            if let Some(held) = DeadLockDetector::lock(id) {
                let err = Error::new(ErrorKind::LockOrderViolation)
                    .with_message(format!("acquiring {id} while holding {held}"));
                panic!("{err}");
            }
        }
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.lock_contended();
        }
    }

    fn try_lock(&self) -> bool {
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        if self.verifying() {
            let id = self.lock_id();
            if let Some(held) = DeadLockDetector::lock(id) {
                // SAFETY: we acquired the lock above.
                unsafe { self.release() };
                let err = Error::new(ErrorKind::LockOrderViolation)
                    .with_message(format!("acquiring {id} while holding {held}"));
                panic!("{err}");
            }
        }
        true
    }

    unsafe fn unlock(&self) {
        if self.verifying() {
            if let Some(id) = LockId::from_raw(self.id.load(Ordering::Acquire)) {
                if !DeadLockDetector::unlock(id) && DeadLockDetector::unlock_unordered(id) {
                    let err = Error::new(ErrorKind::LockDiscipline)
                        .with_message(format!("{id} released out of order"));
                    warn!(lock = %id, "{err}");
                }
            }
        }
        // SAFETY: forwarded from the caller.
        unsafe { self.release() };
    }

    fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != UNLOCKED
    }
}

impl RawFastMutex {
    /// Releases the lock word and wakes at most one parked waiter.
    ///
    /// # Safety
    ///
    /// The calling thread must hold the lock.
    unsafe fn release(&self) {
        if self.state.swap(UNLOCKED, Ordering::Release) == CONTENDED {
            let _parked = self.parker.lock();
            self.wakeup.notify_one();
        }
    }
}

impl Drop for RawFastMutex {
    fn drop(&mut self) {
        if let Some(id) = LockId::from_raw(*self.id.get_mut()) {
            DeadLockDetector::remove_object(id);
        }
    }
}

/// Mutex guarding a `T`, verified against the lock-order graph.
pub type FastMutex<T> = lock_api::Mutex<RawFastMutex, T>;

/// Guard returned by locking a [`FastMutex`].
pub type FastMutexGuard<'a, T> = lock_api::MutexGuard<'a, RawFastMutex, T>;

/// Creates a mutex that is never reported to the lock-order verifier.
///
/// Used for locks taken inside the verifier itself and in hot paths that
/// are known to be leaves of every lock order.
pub const fn unverified<T>(value: T) -> FastMutex<T> {
    FastMutex::const_new(RawFastMutex::UNVERIFIED, value)
}
