//! Synchronization primitives
//!
//! Event objects and the `WaitFor*Object(s)` family.
//!
//! Both the event calls and the waits are safe to issue while the calling
//! thread holds the loader lock. What is *not* safe under the loader lock is
//! waiting for something that itself needs the loader lock, such as the
//! start-up of a freshly created thread; callers bound such waits with a
//! timeout.

use core::time::Duration;

use windows_sys::Win32::{
    Foundation::{WAIT_ABANDONED_0, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT},
    System::Threading::{CreateEventW, INFINITE, SetEvent, WaitForMultipleObjects, WaitForSingleObject},
};

use crate::{
    handle::{RawHandle, Waitable},
    result::Error,
};

/// Maximum number of handles accepted by [`wait_any`] (`MAXIMUM_WAIT_OBJECTS`).
pub const MAX_WAIT_HANDLES: usize = 64;

define_waitable_handle_type! {
    /// A handle to an event kernel object.
    pub struct Event
}

/// Reset behaviour of a new [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventReset {
    /// The event resets itself after releasing a single waiter.
    Auto,
    /// The event stays signaled until explicitly reset.
    Manual,
}

/// Creates a new, unnamed, initially non-signaled event.
///
/// This wraps `CreateEventW(NULL, manual_reset, FALSE, NULL)`.
pub fn create_event(reset: EventReset) -> Result<Event, CreateEventError> {
    let manual_reset = (reset == EventReset::Manual) as i32;

    // SAFETY: Null security attributes and a null name are valid arguments.
    let raw = unsafe { CreateEventW(core::ptr::null(), manual_reset, 0, core::ptr::null()) };
    if raw.is_null() {
        return Err(CreateEventError(Error::last()));
    }

    // SAFETY: `raw` is a freshly created event handle owned by nobody else.
    Ok(unsafe { Event::from_raw(raw) })
}

/// Error type for [`create_event`].
#[derive(Debug, thiserror::Error)]
#[error("CreateEvent failed: {0}")]
pub struct CreateEventError(pub Error);

impl From<CreateEventError> for std::io::Error {
    fn from(value: CreateEventError) -> Self {
        value.0.into()
    }
}

/// Sets the event to the signaled state.
pub fn set_event(event: &Event) -> Result<(), SetEventError> {
    // SAFETY: `event` holds a valid event handle.
    if unsafe { SetEvent(event.as_raw()) } == 0 {
        return Err(SetEventError(Error::last()));
    }
    Ok(())
}

/// Error type for [`set_event`].
#[derive(Debug, thiserror::Error)]
#[error("SetEvent failed: {0}")]
pub struct SetEventError(pub Error);

impl From<SetEventError> for std::io::Error {
    fn from(value: SetEventError) -> Self {
        value.0.into()
    }
}

/// Converts a wait bound into the milliseconds expected by the wait calls.
///
/// `None` maps to `INFINITE`. Finite bounds are rounded up to the next
/// millisecond and saturate just below `INFINITE`, so a finite bound never
/// turns into an infinite wait.
pub fn timeout_ms(timeout: Option<Duration>) -> u32 {
    match timeout {
        None => INFINITE,
        Some(timeout) => {
            let mut ms = timeout.as_millis();
            if Duration::from_millis(ms as u64) < timeout {
                ms += 1;
            }
            ms.min((INFINITE - 1) as u128) as u32
        }
    }
}

/// Blocks until `handle` becomes signaled or `timeout` elapses.
///
/// Returns `Ok(true)` when signaled and `Ok(false)` on timeout. A `None`
/// timeout waits forever.
pub fn wait_one<H>(handle: &H, timeout: Option<Duration>) -> Result<bool, WaitError>
where
    H: Waitable,
{
    // SAFETY: `handle` yields a valid waitable handle for the whole call.
    let ret = unsafe { WaitForSingleObject(handle.raw_handle(), timeout_ms(timeout)) };
    match ret {
        WAIT_OBJECT_0 => Ok(true),
        WAIT_TIMEOUT => Ok(false),
        WAIT_FAILED => Err(WaitError::Failed(Error::last())),
        other => Err(WaitError::Unexpected(other)),
    }
}

/// Blocks until any of `handles` becomes signaled or `timeout` elapses.
///
/// This wraps `WaitForMultipleObjects(.., bWaitAll = FALSE, ..)`.
///
/// Returns `Ok(Some(index))` of the signaled handle with the lowest index, or
/// `Ok(None)` on timeout. Waiting consumes the signal of an auto-reset event.
///
/// Only the first [`MAX_WAIT_HANDLES`] entries of `handles` are waited on.
pub fn wait_any(
    handles: &[&dyn Waitable],
    timeout: Option<Duration>,
) -> Result<Option<usize>, WaitError> {
    let handles_len = handles.len().min(MAX_WAIT_HANDLES);
    let mut raw_handles: [RawHandle; MAX_WAIT_HANDLES] = [core::ptr::null_mut(); MAX_WAIT_HANDLES];
    for (dst, src) in raw_handles[..handles_len].iter_mut().zip(handles) {
        *dst = src.raw_handle();
    }
    let raw_handles = &raw_handles[..handles_len];

    // SAFETY: `raw_handles` lives on the stack for the duration of the call
    // and its first `handles_len` entries are valid waitable handles.
    let ret = unsafe {
        WaitForMultipleObjects(
            raw_handles.len() as u32,
            raw_handles.as_ptr(),
            0,
            timeout_ms(timeout),
        )
    };

    let signaled = WAIT_OBJECT_0..WAIT_OBJECT_0 + raw_handles.len() as u32;
    let abandoned = WAIT_ABANDONED_0..WAIT_ABANDONED_0 + raw_handles.len() as u32;
    match ret {
        _ if signaled.contains(&ret) => Ok(Some((ret - WAIT_OBJECT_0) as usize)),
        WAIT_TIMEOUT => Ok(None),
        WAIT_FAILED => Err(WaitError::Failed(Error::last())),
        _ if abandoned.contains(&ret) => Err(WaitError::Abandoned((ret - WAIT_ABANDONED_0) as usize)),
        other => Err(WaitError::Unexpected(other)),
    }
}

/// Error type for [`wait_one`] and [`wait_any`].
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    /// The wait call failed, e.g. because a handle is invalid.
    #[error("Wait failed: {0}")]
    Failed(Error),
    /// A mutex in the wait set was abandoned by its owner.
    #[error("Abandoned mutex at index {0}")]
    Abandoned(usize),
    /// The wait call returned a value outside its documented range.
    #[error("Unexpected wait result {0:#x}")]
    Unexpected(u32),
}

impl From<WaitError> for std::io::Error {
    fn from(value: WaitError) -> Self {
        match value {
            WaitError::Failed(err) => err.into(),
            other => std::io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_rounds_up_to_whole_milliseconds() {
        assert_eq!(timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_ms(Some(Duration::from_micros(1))), 1);
        assert_eq!(timeout_ms(Some(Duration::from_secs(3))), 3000);
        assert_eq!(timeout_ms(None), INFINITE);
        assert_eq!(timeout_ms(Some(Duration::MAX)), INFINITE - 1);
    }

    #[test]
    fn auto_reset_event_is_consumed_by_wait() {
        let event = create_event(EventReset::Auto).unwrap();
        assert!(!wait_one(&event, Some(Duration::ZERO)).unwrap());

        set_event(&event).unwrap();
        assert!(wait_one(&event, Some(Duration::ZERO)).unwrap());
        assert!(!wait_one(&event, Some(Duration::ZERO)).unwrap());
    }

    #[test]
    fn wait_any_reports_signaled_index() {
        let first = create_event(EventReset::Manual).unwrap();
        let second = create_event(EventReset::Manual).unwrap();
        set_event(&second).unwrap();

        let idx = wait_any(&[&first, &second], Some(Duration::ZERO)).unwrap();
        assert_eq!(idx, Some(1));
    }

    #[test]
    fn duplicated_event_shares_the_kernel_object() {
        let event = create_event(EventReset::Manual).unwrap();
        let dup = event.try_clone().unwrap();
        set_event(&dup).unwrap();
        drop(dup);

        assert!(wait_one(&event, Some(Duration::ZERO)).unwrap());
    }
}
