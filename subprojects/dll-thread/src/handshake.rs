//! Start-up handshake between the owning [`DllThread`](crate::DllThread)
//! and its worker.
//!
//! The [`Handshake`] record is a single heap allocation handed to the OS
//! thread as its only argument. Ownership of the allocation is decided by
//! the join protocol:
//!
//! - The worker entry routine takes ownership as soon as it has signaled
//!   "started", and frees the record when it returns.
//! - A worker that exits without having signaled "started" (it was
//!   terminated, or signaling failed) never took ownership; the owner frees
//!   the record once it has seen the thread exit. A detached worker in that
//!   state leaks its record.
//!
//! The owner only ever dereferences the record while the worker is
//! suspended and has not yet signaled, so the two sides never access it
//! concurrently except through the atomic `cancelled` flag.

use core::{
    any::Any,
    ffi::c_void,
    ptr::NonNull,
    sync::atomic::{self, AtomicBool, Ordering},
};
use std::panic::{self, AssertUnwindSafe};

use crate::platform::Platform;

/// A unit of work run by the worker thread.
pub(crate) type Work = Box<dyn FnOnce() + Send + 'static>;

/// The record shared between the owner and the worker entry routine.
pub(crate) struct Handshake<P: Platform> {
    work: Option<Work>,
    /// The worker's own reference to the start-up event.
    started: P::Event,
    cancelled: AtomicBool,
}

impl<P: Platform> Handshake<P> {
    pub(crate) fn new(work: Work, started: P::Event) -> Self {
        Self {
            work: Some(work),
            started,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Leaks the record so it can be handed to the worker.
    pub(crate) fn into_raw(self) -> NonNull<Self> {
        NonNull::from(Box::leak(Box::new(self)))
    }

    /// Retakes ownership of a leaked record.
    ///
    /// # Safety
    ///
    /// `record` must come from [`Handshake::into_raw`] and no worker may
    /// access it anymore.
    pub(crate) unsafe fn from_raw(record: NonNull<Self>) -> Box<Self> {
        // SAFETY: Guaranteed by the caller.
        unsafe { Box::from_raw(record.as_ptr()) }
    }

    /// Marks the work as cancelled and publishes the flag to all threads.
    ///
    /// # Safety
    ///
    /// `record` must be alive, i.e. the worker has not signaled "started".
    pub(crate) unsafe fn cancel(record: NonNull<Self>) {
        // SAFETY: Guaranteed by the caller.
        let record = unsafe { record.as_ref() };
        record.cancelled.store(true, Ordering::Release);
        atomic::fence(Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Worker thread entry routine.
///
/// `arg` is a record leaked with [`Handshake::into_raw`].
///
/// # Safety
///
/// Must only be installed as the entry point of a thread created with a
/// leaked `Handshake<P>` as its argument.
pub(crate) unsafe extern "system" fn thread_start<P: Platform>(arg: *mut c_void) -> u32 {
    let record = arg.cast::<Handshake<P>>();

    // SAFETY: Until "started" is signaled the owner frees the record only
    // after this thread has exited, so it is alive here.
    if let Err(err) = P::set_event(unsafe { &(*record).started }) {
        // Ownership stays with the owner, which frees the record once it
        // sees this thread exit without having started.
        log::error!("Worker failed to signal start-up, skipping work: {err}");
        return 1;
    }

    // SAFETY: Once "started" is signaled the owner never touches the record
    // again; this thread is now its sole owner.
    let mut record = unsafe { Box::from_raw(record) };

    let cancelled = record.is_cancelled();
    let work = record.work.take();
    drop(record);

    if cancelled {
        log::debug!("Worker cancelled before start, skipping work");
    }

    // Dropping a skipped closure runs its captures' destructors, which may
    // panic as well.
    let outcome = panic::catch_unwind(AssertUnwindSafe(move || match work {
        Some(work) if !cancelled => work(),
        skipped => drop(skipped),
    }));
    if let Err(payload) = outcome {
        log::error!("Worker panicked: {}", panic_message(&*payload));
    }

    0
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "Box<dyn Any>"
    }
}
