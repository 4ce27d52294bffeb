//! Reentrant lock for targets without a module loader lock.
//!
//! Follows the classic reentrant mutex layout: an inner non-reentrant mutex,
//! the owning thread's tag and a recursion counter. Only the owning thread
//! ever touches the counter.

use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicUsize, Ordering},
};

use lock_api::{GetThreadId as _, RawMutex as _};

/// Native handle type: a pointer to the inner raw mutex.
pub type NativeHandle = *const parking_lot::RawMutex;

/// Tag value meaning "no owner". Real thread tags are never zero.
const NO_OWNER: usize = 0;

pub(crate) struct RawReentrantLock {
    mutex: parking_lot::RawMutex,
    owner: AtomicUsize,
    counter: UnsafeCell<u32>,
}

// SAFETY: `counter` is only accessed by the thread whose tag is in `owner`,
// which is only ever set while holding `mutex`.
unsafe impl Sync for RawReentrantLock {}

impl RawReentrantLock {
    pub(crate) fn new() -> Self {
        Self {
            mutex: parking_lot::RawMutex::INIT,
            owner: AtomicUsize::new(NO_OWNER),
            counter: UnsafeCell::new(0),
        }
    }

    pub(crate) fn lock(&self) {
        let current = current_thread_tag();
        if self.owner.load(Ordering::Relaxed) != current {
            self.mutex.lock();
            self.owner.store(current, Ordering::Relaxed);
        }

        // SAFETY: The current thread owns the lock.
        let counter = unsafe { &mut *self.counter.get() };
        *counter += 1;
    }

    pub(crate) fn try_lock(&self) -> bool {
        let current = current_thread_tag();
        if self.owner.load(Ordering::Relaxed) != current {
            if !self.mutex.try_lock() {
                return false;
            }
            self.owner.store(current, Ordering::Relaxed);
        }

        // SAFETY: The current thread owns the lock.
        let counter = unsafe { &mut *self.counter.get() };
        *counter += 1;
        true
    }

    pub(crate) fn unlock(&self) {
        if self.owner.load(Ordering::Relaxed) != current_thread_tag() {
            // Releasing on behalf of another thread would hand the lock to
            // nobody while its owner still believes it holds it.
            panic!("Thread attempted to unlock a lock it does not own: LOCK_UNLOCK_ERROR");
        }

        // SAFETY: The current thread owns the lock.
        let counter = unsafe { &mut *self.counter.get() };
        *counter = counter.saturating_sub(1);
        if *counter == 0 {
            self.owner.store(NO_OWNER, Ordering::Relaxed);
            // SAFETY: The inner mutex is held by the current thread.
            unsafe { self.mutex.unlock() };
        }
    }

    pub(crate) fn native_handle(&self) -> NativeHandle {
        &self.mutex
    }
}

/// Returns a non-zero tag unique to the calling thread while it is alive.
#[inline(always)]
fn current_thread_tag() -> usize {
    parking_lot::RawThreadId::INIT.nonzero_thread_id().get()
}
