//! Test platform.
//!
//! [`TestPlatform`] runs on top of [`Portable`] and adds the hooks the join
//! protocol tests need:
//!
//! - workers can be held before their entry routine, the way a thread stuck
//!   behind the loader lock is;
//! - the worker's start-up signal can be delayed, so a running worker misses
//!   the start-up deadline;
//! - workers can be frozen right after their start-up signal while the
//!   start-up wait misses it, so suspension succeeds on a worker that has
//!   already signaled or already exited;
//! - any platform step can be made to fail, including the worker's own
//!   start-up signal;
//! - every event and thread handle is counted in a [`Ledger`].
//!
//! Settings are per test thread and only affect platform calls made on the
//! thread that set them.

use core::{ffi::c_void, time::Duration};
use std::{
    cell::{Cell, RefCell},
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use parking_lot::{Condvar, Mutex};

use crate::{
    platform::{Platform, StartupWait, ThreadStart},
    sys::{Portable, portable},
};

/// A platform step that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    CreateEvent,
    DuplicateEvent,
    Spawn,
    SetEvent,
    PollEvent,
    Suspend,
    Terminate,
}

/// Live handle counter shared by every object created under one test.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    live: AtomicUsize,
}

impl Ledger {
    /// Number of event and thread handles not yet closed.
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn track(self: &Arc<Self>) -> Tracked {
        self.live.fetch_add(1, Ordering::SeqCst);
        Tracked(Arc::clone(self))
    }
}

#[derive(Debug)]
struct Tracked(Arc<Ledger>);

impl Drop for Tracked {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Where a frozen-after-signal worker is in its start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Starting,
    /// Signaled "started" and waiting to be resumed.
    Parked,
    /// Failed to signal and is exiting.
    Failed,
    Released,
}

/// Freezes a worker right after its start-up signal until resumed.
#[derive(Debug)]
struct Gate {
    state: Mutex<GateState>,
    cvar: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Starting),
            cvar: Condvar::new(),
        }
    }

    /// Called by the worker after a successful start-up signal.
    fn park(&self) {
        let mut state = self.state.lock();
        if *state == GateState::Starting {
            *state = GateState::Parked;
            self.cvar.notify_all();
        }
        while *state != GateState::Released {
            self.cvar.wait(&mut state);
        }
    }

    /// Called by the worker after a failed start-up signal.
    fn fail(&self) {
        *self.state.lock() = GateState::Failed;
        self.cvar.notify_all();
    }

    /// Blocks until the worker has either parked or failed, and reports
    /// which.
    fn wait_reached(&self) -> GateState {
        let mut state = self.state.lock();
        while *state == GateState::Starting {
            self.cvar.wait(&mut state);
        }
        *state
    }

    fn release(&self) {
        *self.state.lock() = GateState::Released;
        self.cvar.notify_all();
    }
}

thread_local! {
    static FREEZE_AFTER_SIGNAL: Cell<bool> = const { Cell::new(false) };
    /// Gate created with the start-up event, picked up by the next spawn.
    static PENDING_GATE: RefCell<Option<Arc<Gate>>> = const { RefCell::new(None) };
    static HOLD_THREADS: Cell<bool> = const { Cell::new(false) };
    static SIGNAL_DELAY: Cell<Option<Duration>> = const { Cell::new(None) };
    static FAIL_AT: Cell<Option<Step>> = const { Cell::new(None) };
    static LEDGER: Arc<Ledger> = Arc::default();
}

/// Holds new workers before their entry routine until resumed or terminated.
pub(crate) fn hold_threads(hold: bool) {
    HOLD_THREADS.with(|cell| cell.set(hold));
}

/// Freezes new workers right after their start-up signal, and makes the
/// start-up wait time out regardless.
pub(crate) fn freeze_after_signal(freeze: bool) {
    FREEZE_AFTER_SIGNAL.with(|cell| cell.set(freeze));
}

/// Delays the start-up signal of workers spawned from now on.
pub(crate) fn delay_start_signal(delay: Option<Duration>) {
    SIGNAL_DELAY.with(|cell| cell.set(delay));
}

/// Makes `step` fail on this thread.
pub(crate) fn fail_at(step: Option<Step>) {
    FAIL_AT.with(|cell| cell.set(step));
}

/// The ledger of the current test thread.
pub(crate) fn ledger() -> Arc<Ledger> {
    LEDGER.with(Arc::clone)
}

fn check(step: Step) -> io::Result<()> {
    if FAIL_AT.with(Cell::get) == Some(step) {
        return Err(io::Error::other(format!("injected {step:?} failure")));
    }
    Ok(())
}

pub(crate) struct TestPlatform;

#[derive(Debug)]
pub(crate) struct Event {
    inner: portable::Event,
    signal_delay: Option<Duration>,
    fail_signal: bool,
    gate: Option<Arc<Gate>>,
    tracked: Tracked,
}

#[derive(Debug)]
pub(crate) struct Thread {
    inner: portable::Thread,
    gate: Option<Arc<Gate>>,
    _tracked: Tracked,
}

impl Platform for TestPlatform {
    type Event = Event;
    type Thread = Thread;
    type ThreadId = thread::ThreadId;
    type NativeHandle = thread::Thread;

    fn create_event() -> io::Result<Event> {
        check(Step::CreateEvent)?;
        let gate = FREEZE_AFTER_SIGNAL
            .with(Cell::get)
            .then(|| Arc::new(Gate::new()));
        PENDING_GATE.with(|pending| *pending.borrow_mut() = gate.clone());
        Ok(Event {
            inner: Portable::create_event()?,
            signal_delay: SIGNAL_DELAY.with(Cell::get),
            fail_signal: FAIL_AT.with(Cell::get) == Some(Step::SetEvent),
            gate,
            tracked: ledger().track(),
        })
    }

    fn duplicate_event(event: &Event) -> io::Result<Event> {
        check(Step::DuplicateEvent)?;
        Ok(Event {
            inner: Portable::duplicate_event(&event.inner)?,
            signal_delay: event.signal_delay,
            fail_signal: event.fail_signal,
            gate: event.gate.clone(),
            tracked: event.tracked.0.track(),
        })
    }

    fn set_event(event: &Event) -> io::Result<()> {
        // Runs on the worker, so the settings travel with the event.
        if let Some(delay) = event.signal_delay {
            thread::sleep(delay);
        }
        if event.fail_signal {
            if let Some(gate) = &event.gate {
                gate.fail();
            }
            return Err(io::Error::other("injected SetEvent failure"));
        }
        Portable::set_event(&event.inner)?;
        if let Some(gate) = &event.gate {
            gate.park();
        }
        Ok(())
    }

    fn poll_event(event: &Event) -> io::Result<bool> {
        check(Step::PollEvent)?;
        Portable::poll_event(&event.inner)
    }

    unsafe fn spawn(
        entry: ThreadStart,
        arg: *mut c_void,
        stack_size: Option<usize>,
    ) -> io::Result<Thread> {
        check(Step::Spawn)?;
        let hold = HOLD_THREADS.with(Cell::get);
        // SAFETY: Forwarded to the caller.
        let inner = unsafe { portable::Thread::spawn(entry, arg, stack_size, hold) }?;
        Ok(Thread {
            inner,
            gate: PENDING_GATE.with(RefCell::take),
            _tracked: ledger().track(),
        })
    }

    fn thread_id(thread: &Thread) -> thread::ThreadId {
        Portable::thread_id(&thread.inner)
    }

    fn native_handle(thread: &Thread) -> thread::Thread {
        Portable::native_handle(&thread.inner)
    }

    fn current_thread_id() -> thread::ThreadId {
        Portable::current_thread_id()
    }

    fn wait_startup(started: &Event, thread: &Thread, timeout: Duration) -> io::Result<StartupWait> {
        if thread.gate.is_some() {
            thread::sleep(timeout);
            return Ok(StartupWait::TimedOut);
        }
        Portable::wait_startup(&started.inner, &thread.inner, timeout)
    }

    fn wait_exit(thread: &Thread, timeout: Option<Duration>) -> io::Result<bool> {
        Portable::wait_exit(&thread.inner, timeout)
    }

    fn suspend(thread: &Thread) -> io::Result<()> {
        check(Step::Suspend)?;
        if let Some(gate) = &thread.gate {
            // A worker that failed to signal is treated as suspended once it
            // has exited.
            if gate.wait_reached() == GateState::Failed {
                Portable::wait_exit(&thread.inner, None)?;
            }
            return Ok(());
        }
        Portable::suspend(&thread.inner)
    }

    fn resume(thread: &Thread) -> io::Result<()> {
        if let Some(gate) = &thread.gate {
            gate.release();
            return Ok(());
        }
        Portable::resume(&thread.inner)
    }

    unsafe fn terminate(thread: &Thread) -> io::Result<()> {
        check(Step::Terminate)?;
        // SAFETY: Forwarded to the caller.
        unsafe { Portable::terminate(&thread.inner) }
    }
}
