//! Target-specific reentrant lock implementations.
//!
//! Both implementations expose the same `RawReentrantLock` surface:
//! `new`, `lock`, `try_lock`, `unlock` and `native_handle`.

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use self::windows::RawReentrantLock;
#[cfg(windows)]
pub use self::windows::NativeHandle;

#[cfg(not(windows))]
mod portable;
#[cfg(not(windows))]
pub(crate) use self::portable::RawReentrantLock;
#[cfg(not(windows))]
pub use self::portable::NativeHandle;
