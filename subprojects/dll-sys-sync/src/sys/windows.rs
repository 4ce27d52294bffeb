//! `RTL_CRITICAL_SECTION` pass-through.
//!
//! A critical section is recursive, non-fair and, unlike most other lock
//! objects, is documented as usable from `DllMain`. The structure must not
//! move once initialized, so it lives in its own heap allocation.

use core::{cell::UnsafeCell, ptr};

use windows_sys::Win32::System::Threading::{
    CRITICAL_SECTION, DeleteCriticalSection, EnterCriticalSection, GetCurrentThreadId,
    InitializeCriticalSection, LeaveCriticalSection, TryEnterCriticalSection,
};

/// Native handle type: a pointer to the underlying critical section.
pub type NativeHandle = *mut CRITICAL_SECTION;

pub(crate) struct RawReentrantLock {
    cs: Box<UnsafeCell<CRITICAL_SECTION>>,
}

// SAFETY: A critical section may be entered and left from any thread.
unsafe impl Send for RawReentrantLock {}
// SAFETY: All state is mutated by the OS under its own synchronization.
unsafe impl Sync for RawReentrantLock {}

impl RawReentrantLock {
    pub(crate) fn new() -> Self {
        // SAFETY: CRITICAL_SECTION is plain old data; it is initialized below
        // before any other use.
        let cs = Box::new(UnsafeCell::new(unsafe { core::mem::zeroed() }));
        // SAFETY: `cs` is a valid, pinned (heap) allocation.
        unsafe { InitializeCriticalSection(cs.get()) };
        Self { cs }
    }

    pub(crate) fn lock(&self) {
        // SAFETY: The critical section was initialized in `new`.
        unsafe { EnterCriticalSection(self.cs.get()) }
    }

    pub(crate) fn try_lock(&self) -> bool {
        // SAFETY: The critical section was initialized in `new`.
        unsafe { TryEnterCriticalSection(self.cs.get()) != 0 }
    }

    pub(crate) fn unlock(&self) {
        // Leaving a critical section the thread does not own is undefined
        // behavior for the OS; catch it here instead.
        // SAFETY: `OwningThread` holds the owner's thread id; the volatile
        // read keeps the compiler from caching it across calls.
        let owner = unsafe { ptr::read_volatile(&raw const (*self.cs.get()).OwningThread) };
        // SAFETY: `GetCurrentThreadId` has no preconditions.
        let current = unsafe { GetCurrentThreadId() };
        if owner as usize != current as usize {
            panic!("Thread attempted to unlock a lock it does not own: LOCK_UNLOCK_ERROR");
        }

        // SAFETY: The current thread owns the critical section.
        unsafe { LeaveCriticalSection(self.cs.get()) }
    }

    pub(crate) fn native_handle(&self) -> NativeHandle {
        self.cs.get()
    }
}

impl Drop for RawReentrantLock {
    fn drop(&mut self) {
        // SAFETY: The critical section was initialized and, since we have
        // exclusive access, is not owned by any thread.
        unsafe { DeleteCriticalSection(self.cs.get()) }
    }
}
