//! Win32 backend.
//!
//! Every operation maps onto a single `dll-svc` wrapper. The start-up wait
//! is a `WaitForMultipleObjects` on the started event and the thread handle,
//! so a worker that exits without ever being observed as started (for
//! example, because it was terminated by the OS) is still detected.

use core::{ffi::c_void, time::Duration};
use std::io;

use dll_svc::{
    handle::{RawHandle, Waitable},
    sync::{self, Event, EventReset},
    thread as svc,
};

use crate::platform::{Platform, StartupWait, ThreadStart};

/// The Win32 platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct Win32;

/// An owned Win32 thread handle together with the thread's identifier.
#[derive(Debug)]
pub struct Thread {
    handle: svc::Thread,
    id: u32,
}

impl Platform for Win32 {
    type Event = Event;
    type Thread = Thread;
    type ThreadId = u32;
    type NativeHandle = RawHandle;

    fn create_event() -> io::Result<Event> {
        sync::create_event(EventReset::Auto).map_err(Into::into)
    }

    fn duplicate_event(event: &Event) -> io::Result<Event> {
        event.try_clone().map_err(Into::into)
    }

    fn set_event(event: &Event) -> io::Result<()> {
        sync::set_event(event).map_err(Into::into)
    }

    fn poll_event(event: &Event) -> io::Result<bool> {
        sync::wait_one(event, Some(Duration::ZERO)).map_err(Into::into)
    }

    unsafe fn spawn(
        entry: ThreadStart,
        arg: *mut c_void,
        stack_size: Option<usize>,
    ) -> io::Result<Thread> {
        // SAFETY: Forwarded to the caller.
        let (handle, id) = unsafe { svc::create(entry, arg, stack_size) }?;
        Ok(Thread { handle, id })
    }

    fn thread_id(thread: &Thread) -> u32 {
        thread.id
    }

    fn native_handle(thread: &Thread) -> RawHandle {
        thread.handle.as_raw()
    }

    fn current_thread_id() -> u32 {
        svc::current_thread_id()
    }

    fn wait_startup(started: &Event, thread: &Thread, timeout: Duration) -> io::Result<StartupWait> {
        let handles: [&dyn Waitable; 2] = [started, &thread.handle];
        match sync::wait_any(&handles, Some(timeout))? {
            Some(0) => Ok(StartupWait::Started),
            Some(_) => Ok(StartupWait::Exited),
            None => Ok(StartupWait::TimedOut),
        }
    }

    fn wait_exit(thread: &Thread, timeout: Option<Duration>) -> io::Result<bool> {
        sync::wait_one(&thread.handle, timeout).map_err(Into::into)
    }

    fn suspend(thread: &Thread) -> io::Result<()> {
        svc::suspend(&thread.handle).map_err(Into::into)
    }

    fn resume(thread: &Thread) -> io::Result<()> {
        svc::resume(&thread.handle).map_err(Into::into)
    }

    unsafe fn terminate(thread: &Thread) -> io::Result<()> {
        // SAFETY: Forwarded to the caller.
        unsafe { svc::terminate(&thread.handle) }.map_err(Into::into)
    }
}
