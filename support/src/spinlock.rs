use std::cell::UnsafeCell;
use std::hint::spin_loop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

/// A spin-lock mutex, the single lock a `PartitionRoot` holds across every
/// public operation in its thread-safe configuration.
///
/// Uses a **ticket lock** internally for FIFO fairness: each acquirer takes a
/// monotonically-increasing ticket and spins until `now_serving` matches. This
/// guarantees that threads acquire the lock in the order they requested it,
/// eliminating starvation under contention. There is no suspension point in
/// the fast path: a thread blocked here is spinning, never sleeping, so the
/// lock must never be held across anything that can itself block for long
/// except the page-allocator calls the slow path is documented to make.
///
/// Supports poisoning semantics for panic recovery: after a panic unwinds
/// through a held lock, `poison_unlock()` marks the mutex poisoned so the
/// next holder can detect that the data it protects may be inconsistent.
pub struct RootLock<T> {
    /// Monotonically-increasing ticket counter. Each `lock()` call takes the
    /// next ticket via `fetch_add(1)`. Wraps at `u16::MAX` — equality checks
    /// handle wrap-around correctly.
    next_ticket: AtomicU16,
    /// The ticket currently being served. Incremented by `fetch_add(1)` on
    /// unlock. A waiter spins until `now_serving == my_ticket`.
    now_serving: AtomicU16,
    poisoned: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: RootLock grants exclusive access through ticket-lock acquisition,
// so sharing across threads is safe as long as the payload itself is Send.
unsafe impl<T: Send> Send for RootLock<T> {}
unsafe impl<T: Send> Sync for RootLock<T> {}

pub struct RootLockGuard<'a, T> {
    lock: &'a RootLock<T>,
}

impl<T> RootLock<T> {
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            next_ticket: AtomicU16::new(0),
            now_serving: AtomicU16::new(0),
            poisoned: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Force-unlock without running the guard's `Drop`.
    ///
    /// # Safety
    /// Only safe when the caller knows no thread currently holds the lock
    /// and is relying on it to regain exclusive access to the data, e.g.
    /// after recovering from a poisoned state.
    #[inline]
    pub unsafe fn force_unlock(&self) {
        self.now_serving
            .store(self.next_ticket.load(Ordering::Relaxed), Ordering::Release);
    }

    /// Force-unlock and mark the mutex poisoned.
    ///
    /// # Safety
    /// Same requirements as `force_unlock()`. Use this on the panic-recovery
    /// path instead of a bare `force_unlock()` so that later holders see
    /// `is_poisoned()` and reinitialize the protected state before trusting
    /// its invariants.
    #[inline]
    pub unsafe fn poison_unlock(&self) {
        self.poisoned.store(true, Ordering::Release);
        self.now_serving
            .store(self.next_ticket.load(Ordering::Relaxed), Ordering::Release);
    }

    /// Returns true if this lock was poisoned by a panic-recovery unlock.
    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Clear the poisoned flag once the protected data's invariants have
    /// been verified or restored.
    #[inline]
    pub fn clear_poison(&self) {
        self.poisoned.store(false, Ordering::Release);
    }

    /// Check whether the lock is currently held (or has waiters queued).
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.next_ticket.load(Ordering::Relaxed) != self.now_serving.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn lock(&self) -> RootLockGuard<'_, T> {
        // Take a ticket. fetch_add wraps at u16::MAX -> 0; equality checks
        // are wrap-safe so this stays correct for any number of acquisitions.
        let my_ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        // Spin until our ticket is being served. The load is Acquire so that
        // every write made by the previous holder becomes visible to us the
        // moment we observe our ticket.
        loop {
            let serving = self.now_serving.load(Ordering::Acquire);
            if serving == my_ticket {
                break;
            }
            // Proportional backoff: pause once per ticket of distance from
            // the front of the queue, capped so a stale read can't spin us
            // for an unbounded number of iterations.
            let distance = my_ticket.wrapping_sub(serving) as u32;
            for _ in 0..distance.min(64) {
                spin_loop();
            }
        }

        RootLockGuard { lock: self }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<RootLockGuard<'_, T>> {
        let current = self.now_serving.load(Ordering::Relaxed);
        if self
            .next_ticket
            .compare_exchange(
                current,
                current.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            Some(RootLockGuard { lock: self })
        } else {
            None
        }
    }
}

impl<T> Deref for RootLockGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: holding the guard means our ticket is the one being served.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for RootLockGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard means our ticket is the one being served.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for RootLockGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // Advance now_serving to hand the lock to the next waiter in FIFO
        // order. Release ordering makes our writes visible to them.
        self.lock.now_serving.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_threaded_lock_unlock() {
        let lock = RootLock::new(0u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = RootLock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn contended_increments_are_serialized() {
        let lock = Arc::new(RootLock::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.lock(), 8000);
    }

    #[test]
    fn poison_unlock_marks_poisoned() {
        let lock = RootLock::new(());
        let guard = lock.lock();
        unsafe { lock.poison_unlock() };
        std::mem::forget(guard);
        assert!(lock.is_poisoned());
        lock.clear_poison();
        assert!(!lock.is_poisoned());
    }
}
