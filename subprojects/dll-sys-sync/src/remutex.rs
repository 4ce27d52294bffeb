//! # Reentrant process lock
//!
//! A reentrant mutual exclusion primitive that can be acquired and released
//! while the calling thread holds the module loader lock.
//!
//! ## Behavior
//!
//! A reentrant lock operates on a "per-thread" basis. A single thread can
//! acquire it multiple times; it is released once the same thread has called
//! [`unlock`](ReentrantProcessLock::unlock) for every successful
//! [`lock`](ReentrantProcessLock::lock) or
//! [`try_lock`](ReentrantProcessLock::try_lock). Other threads block until
//! the owner has fully released it. There are no fairness guarantees.
//!
//! ## Safety Enhancements
//!
//! - **Unlock Guard**: unlocking from a thread that does not own the lock
//!   panics. For a native critical section this is undefined behavior.
//! - **Counter Underflow Protection**: the recursion counter of the portable
//!   implementation saturates instead of wrapping.

use core::marker::PhantomData;

use crate::sys::{NativeHandle, RawReentrantLock};

/// A process-wide, reentrant lock usable during library load and unload.
///
/// This is the Rust equivalent of a Win32 `CRITICAL_SECTION` wrapper.
pub struct ReentrantProcessLock {
    raw: RawReentrantLock,
}

impl Default for ReentrantProcessLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ReentrantProcessLock {
    /// Creates a new, unlocked lock.
    pub fn new() -> Self {
        Self {
            raw: RawReentrantLock::new(),
        }
    }

    /// Acquires the lock.
    ///
    /// If the lock is already held by the current thread, the lock count is
    /// incremented. If it is held by another thread, blocks until released.
    pub fn lock(&self) {
        self.raw.lock()
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// Returns `true` if the lock was acquired (or re-acquired by its owner),
    /// `false` if another thread holds it.
    pub fn try_lock(&self) -> bool {
        self.raw.try_lock()
    }

    /// Releases one level of ownership of the lock.
    ///
    /// The lock becomes available to other threads once the count reaches
    /// zero.
    ///
    /// # Panics
    ///
    /// Panics if called by a thread that does not hold the lock.
    pub fn unlock(&self) {
        self.raw.unlock()
    }

    /// Acquires the lock and returns a guard that releases it when dropped.
    pub fn lock_guard(&self) -> ReentrantLockGuard<'_> {
        self.lock();
        ReentrantLockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Returns the native lock object backing this lock.
    pub fn native_handle(&self) -> NativeHandle {
        self.raw.native_handle()
    }
}

/// RAII guard returned by [`ReentrantProcessLock::lock_guard`].
///
/// The guard must be dropped on the thread that acquired the lock.
#[must_use = "if unused the lock is released immediately"]
pub struct ReentrantLockGuard<'a> {
    lock: &'a ReentrantProcessLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ReentrantLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
