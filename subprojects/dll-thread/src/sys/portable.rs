//! Portable backend built on std threads.
//!
//! Events are flags paired with a process-wide wake-up condition variable,
//! which makes "wait for any of several events" a plain condvar loop. A
//! duplicated event is another reference to the same flag.
//!
//! Portable threads cannot be stopped once they run user code. They can be
//! suspended and terminated only *before* they enter their entry routine,
//! which is the only window in which the join protocol ever needs to do so.
//! Suspending a running thread fails with [`io::ErrorKind::Unsupported`].

use core::{
    ffi::c_void,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
    time::Duration,
};
use std::{io, sync::Arc, thread, time::Instant};

use parking_lot::{Condvar, Mutex};

use crate::platform::{Platform, StartupWait, ThreadStart};

/// The std-based platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct Portable;

static WAKE_LOCK: Mutex<()> = Mutex::new(());
static WAKE_CVAR: Condvar = Condvar::new();

/// Wakes every thread blocked in [`wait_any`] or waiting to be resumed.
fn wake_all() {
    let _guard = WAKE_LOCK.lock();
    WAKE_CVAR.notify_all();
}

#[derive(Debug)]
struct Signal {
    signaled: AtomicBool,
    auto_reset: bool,
}

impl Signal {
    const fn new(auto_reset: bool) -> Self {
        Self {
            signaled: AtomicBool::new(false),
            auto_reset,
        }
    }

    fn set(&self) {
        self.signaled.store(true, Ordering::SeqCst);
        wake_all();
    }

    /// Returns whether the signal is set, clearing it if it auto-resets.
    fn try_consume(&self) -> bool {
        if self.auto_reset {
            self.signaled.swap(false, Ordering::AcqRel)
        } else {
            self.signaled.load(Ordering::Acquire)
        }
    }
}

/// Blocks until one of `signals` is set or `timeout` elapses.
///
/// Returns the index of the first set signal, or `None` on timeout.
fn wait_any(signals: &[&Signal], timeout: Option<Duration>) -> Option<usize> {
    // A bound too large for `Instant` is treated as unbounded.
    let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
    let mut guard = WAKE_LOCK.lock();

    loop {
        if let Some(idx) = signals.iter().position(|signal| signal.try_consume()) {
            return Some(idx);
        }

        match deadline {
            None => WAKE_CVAR.wait(&mut guard),
            Some(deadline) => {
                if Instant::now() >= deadline {
                    return None;
                }
                WAKE_CVAR.wait_until(&mut guard, deadline);
            }
        }
    }
}

/// An auto-reset event.
#[derive(Debug)]
pub struct Event(Arc<Signal>);

/// Scheduling state of a portable thread.
mod activity {
    /// Created, not yet inside its entry routine.
    pub(super) const PENDING: u8 = 0;
    /// Held before its entry routine until resumed or terminated.
    pub(super) const SUSPENDED: u8 = 1;
    /// Inside (or past) its entry routine.
    pub(super) const RUNNING: u8 = 2;
    /// Will never run its entry routine.
    pub(super) const TERMINATED: u8 = 3;
}

#[derive(Debug)]
struct ThreadShared {
    activity: AtomicU8,
    exited: Signal,
}

impl ThreadShared {
    /// Called by the thread itself before the entry routine. Returns `false`
    /// if the thread was terminated and must not run it.
    fn enter(&self) -> bool {
        let mut guard = WAKE_LOCK.lock();
        loop {
            match self.activity.compare_exchange(
                activity::PENDING,
                activity::RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(activity::TERMINATED) => return false,
                Err(_) => WAKE_CVAR.wait(&mut guard),
            }
        }
    }
}

/// Sets the thread's exit signal when dropped, even if the entry routine
/// unwinds.
struct ExitNotifier<'a>(&'a ThreadShared);

impl Drop for ExitNotifier<'_> {
    fn drop(&mut self) {
        self.0.exited.set();
    }
}

/// A raw argument pointer moved into the spawned closure.
struct SendPtr(*mut c_void);

// SAFETY: The pointer is only handed to the entry routine, whose caller
// guaranteed it may be used from the new thread.
unsafe impl Send for SendPtr {}

impl SendPtr {
    fn into_inner(self) -> *mut c_void {
        self.0
    }
}

/// A handle to a portable thread.
#[derive(Debug)]
pub struct Thread {
    shared: Arc<ThreadShared>,
    thread: thread::Thread,
}

impl Thread {
    /// Spawns a std thread that runs `entry(arg)`, optionally held before
    /// its entry routine until resumed.
    ///
    /// # Safety
    ///
    /// `arg` must be valid for whatever `entry` does with it.
    pub(crate) unsafe fn spawn(
        entry: ThreadStart,
        arg: *mut c_void,
        stack_size: Option<usize>,
        start_suspended: bool,
    ) -> io::Result<Self> {
        let initial = if start_suspended {
            activity::SUSPENDED
        } else {
            activity::PENDING
        };
        let shared = Arc::new(ThreadShared {
            activity: AtomicU8::new(initial),
            exited: Signal::new(false),
        });

        let mut builder = thread::Builder::new();
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }

        let arg = SendPtr(arg);
        let worker = Arc::clone(&shared);
        let handle = builder.spawn(move || {
            let arg = arg.into_inner();
            let _exit = ExitNotifier(&worker);
            if worker.enter() {
                // SAFETY: Guaranteed by the caller of `spawn`.
                unsafe { entry(arg) };
            }
        })?;

        Ok(Self {
            shared,
            thread: handle.thread().clone(),
        })
    }
}

impl Platform for Portable {
    type Event = Event;
    type Thread = Thread;
    type ThreadId = thread::ThreadId;
    type NativeHandle = thread::Thread;

    fn create_event() -> io::Result<Event> {
        Ok(Event(Arc::new(Signal::new(true))))
    }

    fn duplicate_event(event: &Event) -> io::Result<Event> {
        Ok(Event(Arc::clone(&event.0)))
    }

    fn set_event(event: &Event) -> io::Result<()> {
        event.0.set();
        Ok(())
    }

    fn poll_event(event: &Event) -> io::Result<bool> {
        Ok(event.0.try_consume())
    }

    unsafe fn spawn(
        entry: ThreadStart,
        arg: *mut c_void,
        stack_size: Option<usize>,
    ) -> io::Result<Thread> {
        // SAFETY: Forwarded to the caller.
        unsafe { Thread::spawn(entry, arg, stack_size, false) }
    }

    fn thread_id(thread: &Thread) -> thread::ThreadId {
        thread.thread.id()
    }

    fn native_handle(thread: &Thread) -> thread::Thread {
        thread.thread.clone()
    }

    fn current_thread_id() -> thread::ThreadId {
        thread::current().id()
    }

    fn wait_startup(started: &Event, thread: &Thread, timeout: Duration) -> io::Result<StartupWait> {
        Ok(match wait_any(&[&started.0, &thread.shared.exited], Some(timeout)) {
            Some(0) => StartupWait::Started,
            Some(_) => StartupWait::Exited,
            None => StartupWait::TimedOut,
        })
    }

    fn wait_exit(thread: &Thread, timeout: Option<Duration>) -> io::Result<bool> {
        Ok(wait_any(&[&thread.shared.exited], timeout).is_some())
    }

    fn suspend(thread: &Thread) -> io::Result<()> {
        match thread.shared.activity.compare_exchange(
            activity::PENDING,
            activity::SUSPENDED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) | Err(activity::SUSPENDED) => Ok(()),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "portable threads cannot be suspended once running",
            )),
        }
    }

    fn resume(thread: &Thread) -> io::Result<()> {
        if thread
            .shared
            .activity
            .compare_exchange(
                activity::SUSPENDED,
                activity::PENDING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            wake_all();
        }
        Ok(())
    }

    unsafe fn terminate(thread: &Thread) -> io::Result<()> {
        let shared = &thread.shared;
        let mut current = shared.activity.load(Ordering::Acquire);
        loop {
            if current == activity::RUNNING {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "portable threads cannot be terminated once running",
                ));
            }
            if current == activity::TERMINATED {
                return Ok(());
            }
            match shared.activity.compare_exchange(
                current,
                activity::TERMINATED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        wake_all();
        Ok(())
    }
}
