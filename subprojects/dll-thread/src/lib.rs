//! # dll-thread
//!
//! A joinable worker thread that can be spawned and joined while the calling
//! thread holds the module loader lock, e.g. from a dynamic library's
//! load/unload entry point.
//!
//! A plain "wait until the worker finishes" join deadlocks in that context:
//! the new thread needs the loader lock before it runs its first
//! instruction, while the joiner holds the lock and waits for it. [`DllThread`]
//! adds a start-up handshake so that [`join`](DllThread::join) can tell a
//! worker that never started from one that is running. A worker that has
//! not started within the start-up timeout is cancelled before it runs any
//! user code, and the join still succeeds.
//!
//! ```ignore
//! let mut worker = dll_thread::DllThread::spawn(|| flush_caches())?;
//! worker.join()?;
//! ```
//!
//! The OS is reached through the [`Platform`] trait. [`DefaultPlatform`] is
//! the Win32 backend on Windows and a std-based backend elsewhere.
//!
//! # References
//!
//! - [Microsoft Learn: Dynamic-Link Library Best Practices](https://learn.microsoft.com/en-us/windows/win32/dlls/dynamic-link-library-best-practices)

mod builder;
mod error;
mod handshake;
mod platform;
mod sys;
mod thread;

#[cfg(test)]
mod testing;

pub use builder::{Builder, DEFAULT_STARTUP_TIMEOUT};
pub use error::{DetachError, JoinError, SpawnError};
pub use platform::{Platform, StartupWait, ThreadStart};
pub use sys::{DefaultPlatform, Portable};
#[cfg(windows)]
pub use sys::Win32;
pub use thread::{DllThread, available_parallelism};
