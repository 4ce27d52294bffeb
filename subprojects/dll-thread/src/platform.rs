//! The OS seam.
//!
//! [`Platform`] collects the handful of kernel operations the start-up
//! handshake is built from: an auto-reset event, its duplication, thread
//! creation, waits, and the suspend/resume/terminate trio used by forced
//! cancellation.

use core::{ffi::c_void, fmt, time::Duration};
use std::io;

/// Thread entry point function type.
///
/// Matches `LPTHREAD_START_ROUTINE`, so it can be handed to the OS directly.
pub type ThreadStart = unsafe extern "system" fn(*mut c_void) -> u32;

/// Outcome of the bounded start-up wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupWait {
    /// The worker signaled that it began executing.
    Started,
    /// The thread already exited.
    Exited,
    /// Neither happened within the timeout.
    TimedOut,
}

/// Kernel operations required by [`DllThread`](crate::DllThread).
///
/// Handles are owned values: dropping an `Event` or a `Thread` closes the
/// underlying handle without affecting the kernel object's other handles or
/// the thread's execution.
pub trait Platform: Sized + 'static {
    /// An auto-reset event handle.
    type Event: Send + Sync;
    /// An owned thread handle. Signaled once the thread has exited.
    type Thread: Send + Sync;
    /// OS thread identifier.
    type ThreadId: Copy + Eq + fmt::Debug + Send + Sync + 'static;
    /// Native handle type exposed through `DllThread::native_handle`.
    type NativeHandle;

    /// Creates a new auto-reset event in the non-signaled state.
    fn create_event() -> io::Result<Self::Event>;

    /// Duplicates an event handle. Both handles refer to the same event.
    fn duplicate_event(event: &Self::Event) -> io::Result<Self::Event>;

    /// Signals an event.
    fn set_event(event: &Self::Event) -> io::Result<()>;

    /// Returns whether the event is signaled, consuming the signal. Never
    /// blocks.
    fn poll_event(event: &Self::Event) -> io::Result<bool>;

    /// Creates and starts a new thread running `entry(arg)`.
    ///
    /// # Safety
    ///
    /// `arg` must be valid for whatever `entry` does with it.
    unsafe fn spawn(
        entry: ThreadStart,
        arg: *mut c_void,
        stack_size: Option<usize>,
    ) -> io::Result<Self::Thread>;

    /// Returns the identifier of the thread.
    fn thread_id(thread: &Self::Thread) -> Self::ThreadId;

    /// Returns the native handle of the thread.
    fn native_handle(thread: &Self::Thread) -> Self::NativeHandle;

    /// Returns the identifier of the calling thread.
    fn current_thread_id() -> Self::ThreadId;

    /// Waits until `started` is signaled or `thread` exits, for at most
    /// `timeout`. Consumes the signal of `started` if it is reported.
    fn wait_startup(
        started: &Self::Event,
        thread: &Self::Thread,
        timeout: Duration,
    ) -> io::Result<StartupWait>;

    /// Waits until `thread` exits. Returns `Ok(false)` on timeout; a `None`
    /// timeout waits forever.
    fn wait_exit(thread: &Self::Thread, timeout: Option<Duration>) -> io::Result<bool>;

    /// Suspends the thread. On success the thread is guaranteed to be
    /// stopped when this returns.
    fn suspend(thread: &Self::Thread) -> io::Result<()>;

    /// Resumes a thread suspended with [`Platform::suspend`].
    fn resume(thread: &Self::Thread) -> io::Result<()>;

    /// Terminates the thread. Termination may complete asynchronously; use
    /// [`Platform::wait_exit`] to observe it.
    ///
    /// # Safety
    ///
    /// The thread must be suspended and must not have executed any code
    /// whose abandonment could corrupt shared state.
    unsafe fn terminate(thread: &Self::Thread) -> io::Result<()>;
}
