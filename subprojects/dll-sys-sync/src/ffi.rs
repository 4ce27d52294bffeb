//! FFI bindings for the `dll-sys-sync` crate - Reentrant process lock
//!
//! The lock is handed to C as an opaque pointer obtained from
//! [`__dll_sys_sync_process_lock_new`] and released with
//! [`__dll_sys_sync_process_lock_free`].

use crate::remutex::ReentrantProcessLock;

/// Allocates and initializes a new, unlocked process lock.
#[unsafe(no_mangle)]
pub extern "C" fn __dll_sys_sync_process_lock_new() -> *mut ReentrantProcessLock {
    Box::into_raw(Box::new(ReentrantProcessLock::new()))
}

/// Destroys a process lock.
///
/// # Safety
///
/// This function is unsafe because it:
/// - Requires that `lock` was returned by [`__dll_sys_sync_process_lock_new`]
///   and has not been freed yet
/// - Requires that no thread holds or waits on the lock
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __dll_sys_sync_process_lock_free(lock: *mut ReentrantProcessLock) {
    if lock.is_null() {
        return;
    }
    drop(unsafe { Box::from_raw(lock) })
}

/// Locks the process lock.
///
/// # Safety
///
/// This function is unsafe because it:
/// - Requires that `lock` points to a live ReentrantProcessLock instance
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __dll_sys_sync_process_lock_lock(lock: *mut ReentrantProcessLock) {
    unsafe { &*lock }.lock()
}

/// Attempts to lock the process lock without waiting.
///
/// # Safety
///
/// This function is unsafe because it:
/// - Requires that `lock` points to a live ReentrantProcessLock instance
///
/// # Returns
///
/// Returns `true` if the lock was acquired, `false` if another thread holds it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __dll_sys_sync_process_lock_try_lock(lock: *mut ReentrantProcessLock) -> bool {
    unsafe { &*lock }.try_lock()
}

/// Unlocks the process lock.
///
/// # Safety
///
/// This function is unsafe because it:
/// - Requires that `lock` points to a live ReentrantProcessLock instance
/// - Requires that the calling thread holds the lock
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __dll_sys_sync_process_lock_unlock(lock: *mut ReentrantProcessLock) {
    unsafe { &*lock }.unlock()
}
