//! # Spin Lock
//!
//! The allocator singleton needs mutual exclusion without an OS: whoever
//! reaches the heap first must finish its pointer surgery before anyone
//! else starts. Critical sections here are a handful of word writes, so
//! busy-waiting is cheaper than any kind of queueing.
//!
//! Acquisition uses test-and-test-and-set: a failed compare-exchange drops
//! back to plain loads until the flag reads unlocked, which keeps the cache
//! line shared instead of bouncing it between waiters.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Busy-wait mutual exclusion around a value.
///
/// Access comes in two flavors: [`lock`](SpinLock::lock) hands out an RAII
/// [`SpinLockGuard`] that unlocks on drop, and
/// [`with_lock`](SpinLock::with_lock) scopes the critical section to a
/// closure. [`try_lock`](SpinLock::try_lock) never waits.
///
/// Holding the guard across anything slow (I/O, another lock) defeats the
/// point; the heap code keeps its sections to a few loads and stores.
/// Interrupts are not masked, so this is not reentrancy-safe either: the
/// allocator's contract already forbids reentrance.
pub struct SpinLock<T> {
    /// `true` while some guard is alive.
    held: AtomicBool,
    value: UnsafeCell<T>,
}

// Safety: only one guard exists at a time, so handing `&SpinLock` to other
// threads exposes the value strictly sequentially; that needs T: Send but
// nothing more.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Wrap `value` in an unlocked lock.
    pub const fn new(value: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Block (by spinning) until the lock is ours.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        loop {
            if self
                .held
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinLockGuard { lock: self };
            }
            // wait on plain loads; retry the exchange once it reads free
            while self.held.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }

    /// One acquisition attempt, `None` if someone else holds the lock.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self
            .held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Run `f` under the lock and return its result.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut *guard)
    }

    /// Lock-free access through exclusive ownership.
    ///
    /// `&mut self` proves no guard can exist, so the flag is not consulted.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

/// Exclusive access to the value inside a [`SpinLock`].
///
/// The lock is released when the guard goes out of scope, including during
/// unwinding.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: a live guard means the flag is set and no other guard exists.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: a live guard means the flag is set and no other guard exists.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}
