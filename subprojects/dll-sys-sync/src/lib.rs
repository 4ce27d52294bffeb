//! # dll-sys-sync
//!
//! Process-wide synchronization primitives that stay usable while the calling
//! thread holds the module loader lock, i.e. from inside a dynamic library's
//! load/unload entry point.
//!
//! On Windows the lock is a pass-through to an `RTL_CRITICAL_SECTION`, which
//! the loader itself uses and which never needs the loader lock to be
//! acquired or released. Other targets have no loader lock; there the same
//! reentrant protocol is built on top of a `parking_lot` raw mutex.
//!
//! # References
//!
//! - [Microsoft Learn: Critical Section Objects](https://learn.microsoft.com/en-us/windows/win32/sync/critical-section-objects)
//! - [Microsoft Learn: DllMain entry point](https://learn.microsoft.com/en-us/windows/win32/dlls/dllmain)

#[cfg(feature = "ffi")]
mod ffi;

mod remutex;
mod sys;

#[doc(inline)]
pub use self::remutex::{ReentrantLockGuard, ReentrantProcessLock};
pub use self::sys::NativeHandle;
