//! Thread management
//!
//! Safe wrappers around the Win32 thread calls. The functions map almost
//! one-to-one to their underlying API calls while translating failures into
//! strongly typed Rust error enums.
//!
//! [`suspend`] and [`terminate`] are the two calls that make forced
//! cancellation of a thread possible. Both are asynchronous on Windows: a
//! successful return only means the request was queued. [`suspend`]
//! therefore confirms the suspension with `GetThreadContext` before
//! returning, and a terminated thread has only stopped once its handle is
//! signaled.

use core::ffi::c_void;

use windows_sys::Win32::System::{
    Diagnostics::Debug::{CONTEXT, GetThreadContext},
    Threading::{
        CreateThread, GetCurrentThreadId, ResumeThread, STACK_SIZE_PARAM_IS_A_RESERVATION,
        SuspendThread, TerminateThread,
    },
};

use crate::result::Error;

#[cfg(target_arch = "x86_64")]
use windows_sys::Win32::System::Diagnostics::Debug::CONTEXT_CONTROL_AMD64 as CONTEXT_CONTROL;
#[cfg(target_arch = "aarch64")]
use windows_sys::Win32::System::Diagnostics::Debug::CONTEXT_CONTROL_ARM64 as CONTEXT_CONTROL;
#[cfg(target_arch = "x86")]
use windows_sys::Win32::System::Diagnostics::Debug::CONTEXT_CONTROL_X86 as CONTEXT_CONTROL;

/// Thread entry point function type (`LPTHREAD_START_ROUTINE`).
pub type ThreadFunc = unsafe extern "system" fn(*mut c_void) -> u32;

/// Value returned by `SuspendThread` / `ResumeThread` on failure.
const SUSPEND_FAILED: u32 = u32::MAX;

define_waitable_handle_type! {
    /// A handle to a thread kernel object.
    ///
    /// The handle becomes signaled once the thread has exited.
    pub struct Thread
}

/// Returns the identifier of the calling thread.
pub fn current_thread_id() -> u32 {
    // SAFETY: `GetCurrentThreadId` has no preconditions.
    unsafe { GetCurrentThreadId() }
}

/// Creates a new, immediately runnable thread.
///
/// This wraps `CreateThread(NULL, stack_size, entry, arg, flags, &id)`.
/// When `stack_size` is `Some`, it is treated as the stack *reservation*
/// size; otherwise the executable's default is used.
///
/// On success returns the owned thread handle together with the thread
/// identifier.
///
/// # Safety
///
/// `entry` will be called on the new thread with `arg`. The caller must
/// guarantee that `arg` is valid for whatever `entry` does with it, for as
/// long as the thread may access it.
pub unsafe fn create(
    entry: ThreadFunc,
    arg: *mut c_void,
    stack_size: Option<usize>,
) -> Result<(Thread, u32), CreateThreadError> {
    let (stack_size, flags) = match stack_size {
        Some(size) => (size, STACK_SIZE_PARAM_IS_A_RESERVATION),
        None => (0, 0),
    };

    let mut id = 0u32;
    // SAFETY: Null security attributes are valid; the entry point and its
    // argument are forwarded under the caller's guarantees.
    let raw = unsafe { CreateThread(core::ptr::null(), stack_size, Some(entry), arg, flags, &mut id) };
    if raw.is_null() {
        return Err(CreateThreadError(Error::last()));
    }

    // SAFETY: `raw` is a freshly created thread handle owned by nobody else.
    Ok((unsafe { Thread::from_raw(raw) }, id))
}

/// Error type for [`create`].
#[derive(Debug, thiserror::Error)]
#[error("CreateThread failed: {0}")]
pub struct CreateThreadError(pub Error);

impl From<CreateThreadError> for std::io::Error {
    fn from(value: CreateThreadError) -> Self {
        value.0.into()
    }
}

/// Suspends a thread and waits until the suspension has taken effect.
///
/// `SuspendThread` only queues the request; the follow-up
/// `GetThreadContext` call does not return until the target thread has
/// actually stopped running user-mode code.
///
/// Must not be called on the current thread.
pub fn suspend(thread: &Thread) -> Result<(), SuspendThreadError> {
    // SAFETY: `thread` holds a valid thread handle.
    if unsafe { SuspendThread(thread.as_raw()) } == SUSPEND_FAILED {
        return Err(SuspendThreadError::Suspend(Error::last()));
    }

    // SAFETY: CONTEXT is plain old data; all-zeroes is a valid value.
    let mut ctx: CONTEXT = unsafe { core::mem::zeroed() };
    ctx.ContextFlags = CONTEXT_CONTROL;
    // SAFETY: `ctx` is a properly aligned CONTEXT with its flags set.
    if unsafe { GetThreadContext(thread.as_raw(), &mut ctx) } == 0 {
        let err = Error::last();
        // Undo the suspension, the caller cannot rely on it.
        // SAFETY: `thread` holds a valid thread handle.
        unsafe { ResumeThread(thread.as_raw()) };
        return Err(SuspendThreadError::Confirm(err));
    }

    Ok(())
}

/// Error type for [`suspend`].
#[derive(Debug, thiserror::Error)]
pub enum SuspendThreadError {
    /// `SuspendThread` failed, e.g. because the thread already exited.
    #[error("SuspendThread failed: {0}")]
    Suspend(Error),
    /// The suspension could not be confirmed; the thread was resumed.
    #[error("GetThreadContext failed: {0}")]
    Confirm(Error),
}

impl From<SuspendThreadError> for std::io::Error {
    fn from(value: SuspendThreadError) -> Self {
        match value {
            SuspendThreadError::Suspend(err) | SuspendThreadError::Confirm(err) => err.into(),
        }
    }
}

/// Decrements the suspend count of a thread, resuming it when it reaches zero.
pub fn resume(thread: &Thread) -> Result<(), ResumeThreadError> {
    // SAFETY: `thread` holds a valid thread handle.
    if unsafe { ResumeThread(thread.as_raw()) } == SUSPEND_FAILED {
        return Err(ResumeThreadError(Error::last()));
    }
    Ok(())
}

/// Error type for [`resume`].
#[derive(Debug, thiserror::Error)]
#[error("ResumeThread failed: {0}")]
pub struct ResumeThreadError(pub Error);

impl From<ResumeThreadError> for std::io::Error {
    fn from(value: ResumeThreadError) -> Self {
        value.0.into()
    }
}

/// Requests termination of a thread with exit code `0`.
///
/// Termination is asynchronous; wait on the thread handle to observe it.
///
/// # Safety
///
/// The thread is stopped wherever it is. Any lock it holds stays held and
/// any memory it owns leaks. The caller must know the thread is not inside
/// code whose abandonment would corrupt shared state.
pub unsafe fn terminate(thread: &Thread) -> Result<(), TerminateThreadError> {
    // SAFETY: `thread` holds a valid thread handle; the consequences of the
    // termination itself are on the caller.
    if unsafe { TerminateThread(thread.as_raw(), 0) } == 0 {
        return Err(TerminateThreadError(Error::last()));
    }
    Ok(())
}

/// Error type for [`terminate`].
#[derive(Debug, thiserror::Error)]
#[error("TerminateThread failed: {0}")]
pub struct TerminateThreadError(pub Error);

impl From<TerminateThreadError> for std::io::Error {
    fn from(value: TerminateThreadError) -> Self {
        value.0.into()
    }
}
