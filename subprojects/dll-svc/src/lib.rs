//! # dll-svc
//!
//! Thin, typed wrappers around the Win32 calls that back the loader-lock-safe
//! threading primitives of this workspace.
//!
//! Each safe wrapper maps almost one-to-one to its underlying API call while
//! translating the `GetLastError` code of a failure into a strongly typed
//! error enum. Handles are owned: dropping a handle type closes it.
//!
//! On non-Windows targets this crate is empty.
//!
//! ## References:
//! - [Microsoft Learn: Synchronization Functions](https://learn.microsoft.com/en-us/windows/win32/sync/synchronization-functions)
//! - [Microsoft Learn: Process and Thread Functions](https://learn.microsoft.com/en-us/windows/win32/procthread/process-and-thread-functions)
//! - [Microsoft Learn: Dynamic-Link Library Best Practices](https://learn.microsoft.com/en-us/windows/win32/dlls/dynamic-link-library-best-practices)

#![cfg(windows)]

#[macro_use]
pub mod handle;
pub mod result;
pub mod sync;
pub mod thread;
