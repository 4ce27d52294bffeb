//! # Loader-lock-safe worker thread
//!
//! [`DllThread`] owns one OS thread running one unit of work, plus the
//! start-up event the worker signals before it runs anything else.
//!
//! ## Join protocol
//!
//! [`join`](DllThread::join) first waits, for at most the start-up timeout,
//! until the worker either signals "started" or exits:
//!
//! - **Started**: the worker is running user code and is waited for without
//!   a bound. A started worker is never terminated.
//! - **Exited**: the worker is already gone; the join succeeds.
//! - **Timed out**: the worker is most likely held by the loader lock, which
//!   the joining thread may itself hold. The worker is suspended, and if it
//!   still has not signaled "started" it is flagged as cancelled and
//!   terminated before it ran any user code. If it cannot be suspended, or
//!   turns out to have started after all, it is resumed and waited for.
//!
//! In every case the join reports success and the handle becomes
//! non-joinable. Forced cancellation is logged, never reported as an error.

use core::{fmt, num::NonZeroUsize, ptr::NonNull, time::Duration};
use std::thread;

use crate::{
    builder::{Builder, DEFAULT_STARTUP_TIMEOUT},
    error::{DetachError, JoinError, SpawnError},
    handshake::{Handshake, Work, thread_start},
    platform::{Platform, StartupWait},
    sys::DefaultPlatform,
};

/// A joinable worker thread that is safe to spawn and join while holding the
/// module loader lock.
///
/// Dropping a joinable `DllThread` joins it. A default-constructed value is
/// not joinable and owns no thread.
#[must_use = "dropping a DllThread joins it immediately"]
pub struct DllThread<P: Platform = DefaultPlatform> {
    inner: Option<Inner<P>>,
    startup_timeout: Duration,
}

/// The handle set of a joinable worker.
struct Inner<P: Platform> {
    thread: P::Thread,
    started: P::Event,
    id: P::ThreadId,
    record: NonNull<Handshake<P>>,
}

// SAFETY: `record` is only dereferenced by the join protocol while the
// worker is suspended before start-up, or after it has exited; the remaining
// fields are `Send` by the `Platform` bounds.
unsafe impl<P: Platform> Send for Inner<P> {}

// SAFETY: No operation on `&Inner` touches `record`.
unsafe impl<P: Platform> Sync for Inner<P> {}

impl DllThread {
    /// Spawns a worker running `f` on the default platform, with the default
    /// start-up timeout.
    ///
    /// Use [`Builder`] to configure the timeout or stack size.
    pub fn spawn<F>(f: F) -> Result<Self, SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        Builder::new().spawn(f)
    }
}

impl<P: Platform> DllThread<P> {
    /// Creates the start-up event, the worker's duplicate of it and the
    /// handshake record, then starts the thread.
    ///
    /// Whatever was acquired before a failing step is released before the
    /// error is returned.
    pub(crate) fn spawn_with(
        work: Work,
        startup_timeout: Duration,
        stack_size: Option<usize>,
    ) -> Result<Self, SpawnError> {
        let started = P::create_event().map_err(SpawnError::CreateEvent)?;
        let worker_started = P::duplicate_event(&started).map_err(SpawnError::DuplicateEvent)?;
        let record = Handshake::<P>::new(work, worker_started).into_raw();

        // SAFETY: `thread_start::<P>` expects exactly a leaked `Handshake<P>`.
        let spawned = unsafe { P::spawn(thread_start::<P>, record.as_ptr().cast(), stack_size) };
        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => {
                // SAFETY: No thread was created, nothing else can reach it.
                drop(unsafe { Handshake::from_raw(record) });
                return Err(SpawnError::CreateThread(err));
            }
        };

        let id = P::thread_id(&thread);
        log::debug!("Spawned worker thread {id:?}");

        Ok(Self {
            inner: Some(Inner {
                thread,
                started,
                id,
                record,
            }),
            startup_timeout,
        })
    }

    /// Returns `true` if this value owns a worker that has been neither
    /// joined nor detached.
    pub fn joinable(&self) -> bool {
        self.inner.is_some()
    }

    /// Returns the OS identifier of the worker while joinable.
    pub fn id(&self) -> Option<P::ThreadId> {
        self.inner.as_ref().map(|inner| inner.id)
    }

    /// Returns the native handle of the worker while joinable.
    ///
    /// The handle stays owned by `self`.
    pub fn native_handle(&self) -> Option<P::NativeHandle> {
        self.inner.as_ref().map(|inner| P::native_handle(&inner.thread))
    }

    /// How long [`join`](Self::join) waits for start-up before cancelling.
    pub fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    /// Waits for the worker to finish, cancelling it if it never started.
    ///
    /// On success the value is no longer joinable. On error it is left
    /// unchanged.
    ///
    /// # Errors
    ///
    /// - [`JoinError::NotJoinable`] if there is no worker to join.
    /// - [`JoinError::Deadlock`] if called from the worker itself.
    pub fn join(&mut self) -> Result<(), JoinError> {
        match &self.inner {
            None => return Err(JoinError::NotJoinable),
            Some(inner) if inner.id == P::current_thread_id() => return Err(JoinError::Deadlock),
            Some(_) => {}
        }

        if let Some(inner) = self.inner.take() {
            inner.join(self.startup_timeout);
        }
        Ok(())
    }

    /// Lets the worker run on without an owner.
    ///
    /// Closes this value's handles to the thread and the start-up event and
    /// returns immediately. The worker is not affected.
    ///
    /// # Errors
    ///
    /// [`DetachError::NotJoinable`] if there is no worker to detach.
    pub fn detach(&mut self) -> Result<(), DetachError> {
        let inner = self.inner.take().ok_or(DetachError::NotJoinable)?;
        log::debug!("Detached worker thread {:?}", inner.id);
        Ok(())
    }
}

impl<P: Platform> Inner<P> {
    fn join(self, startup_timeout: Duration) {
        let id = self.id;
        match P::wait_startup(&self.started, &self.thread, startup_timeout) {
            Ok(StartupWait::Started) => {
                self.wait_for_exit();
            }
            Ok(StartupWait::Exited) => {
                log::debug!("Worker thread {id:?} exited before signaling start-up");
                // SAFETY: The thread exited without signaling "started".
                unsafe { self.free_record() };
            }
            Ok(StartupWait::TimedOut) => {
                log::warn!(
                    "Worker thread {id:?} did not start within {startup_timeout:?}, suspecting a loader lock deadlock"
                );
                self.cancel();
            }
            Err(err) => {
                log::error!("Waiting for worker thread {id:?} to start failed: {err}");
                self.cancel();
            }
        }
    }

    /// Cancels a worker that may not have started yet.
    fn cancel(self) {
        let id = self.id;

        if let Err(err) = P::suspend(&self.thread) {
            log::debug!("Worker thread {id:?} cannot be suspended ({err}), waiting for it");
            self.wait_and_reclaim();
            return;
        }

        match P::poll_event(&self.started) {
            Ok(false) => {}
            Ok(true) => {
                log::debug!("Worker thread {id:?} started late, waiting for it");
                self.resume();
                self.wait_for_exit();
                return;
            }
            Err(err) => {
                log::error!("Polling start-up of worker thread {id:?} failed: {err}");
                self.resume();
                self.wait_for_exit();
                return;
            }
        }

        if matches!(P::wait_exit(&self.thread, Some(Duration::ZERO)), Ok(true)) {
            log::debug!("Worker thread {id:?} exited before signaling start-up");
            // SAFETY: The thread exited without signaling "started".
            unsafe { self.free_record() };
            return;
        }

        // The worker is frozen before signaling "started" and has not taken
        // ownership of the record.
        // SAFETY: See above.
        unsafe { Handshake::cancel(self.record) };
        log::warn!("Cancelling worker thread {id:?} before it started");

        // SAFETY: The thread is suspended before running any user code.
        match unsafe { P::terminate(&self.thread) } {
            Ok(()) => {
                if self.wait_for_exit() {
                    // SAFETY: The thread exited without signaling "started".
                    unsafe { self.free_record() };
                }
            }
            Err(err) => {
                // The worker sees the flag, skips the work and frees the
                // record itself.
                log::error!("Terminating worker thread {id:?} failed: {err}");
                self.resume();
            }
        }
    }

    /// Waits for the thread to exit, then frees the record if the worker
    /// never signaled "started" and so never took ownership of it.
    fn wait_and_reclaim(&self) {
        if !self.wait_for_exit() {
            return;
        }
        if let Ok(false) = P::poll_event(&self.started) {
            log::debug!("Worker thread {:?} exited before signaling start-up", self.id);
            // SAFETY: The thread exited without signaling "started".
            unsafe { self.free_record() };
        }
    }

    /// Waits, without a bound, for the thread to exit. Returns whether the
    /// exit was observed.
    fn wait_for_exit(&self) -> bool {
        match P::wait_exit(&self.thread, None) {
            Ok(exited) => exited,
            Err(err) => {
                log::error!("Waiting for worker thread {:?} to exit failed: {err}", self.id);
                false
            }
        }
    }

    fn resume(&self) {
        if let Err(err) = P::resume(&self.thread) {
            log::error!("Resuming worker thread {:?} failed: {err}", self.id);
        }
    }

    /// # Safety
    ///
    /// The thread must have exited without signaling "started".
    unsafe fn free_record(&self) {
        // SAFETY: Guaranteed by the caller; the worker never took ownership.
        drop(unsafe { Handshake::from_raw(self.record) });
    }
}

impl<P: Platform> Default for DllThread<P> {
    fn default() -> Self {
        Self {
            inner: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

impl<P: Platform> fmt::Debug for DllThread<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DllThread")
            .field("id", &self.id())
            .field("startup_timeout", &self.startup_timeout)
            .finish()
    }
}

impl<P: Platform> Drop for DllThread<P> {
    fn drop(&mut self) {
        match self.join() {
            Ok(()) | Err(JoinError::NotJoinable) => {}
            Err(JoinError::Deadlock) => {
                log::warn!("Worker thread dropped its own handle, detaching");
                let _ = self.detach();
            }
        }
    }
}

/// Returns the number of threads that can run concurrently, or `1` if it
/// cannot be determined.
pub fn available_parallelism() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

#[cfg(test)]
mod tests {
    use std::{
        mem,
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
            mpsc,
        },
        time::Instant,
    };

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::testing::{self, Step, TestPlatform};

    assert_impl_all!(DllThread: Send, Sync, Default);
    assert_not_impl_any!(DllThread: Clone, Copy);

    const SHORT_TIMEOUT: Duration = Duration::from_millis(50);

    fn test_builder() -> Builder {
        Builder::new().startup_timeout(SHORT_TIMEOUT)
    }

    /// Waits up to five seconds for `cond` to hold.
    fn eventually(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn join_runs_the_work_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let worker_counter = Arc::clone(&counter);

        let mut worker = DllThread::spawn(move || {
            worker_counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(worker.joinable());
        assert!(worker.id().is_some());

        worker.join().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!worker.joinable());
        assert!(worker.id().is_none());
        assert!(worker.native_handle().is_none());
    }

    #[test]
    fn second_join_is_rejected() {
        let mut worker = DllThread::spawn(|| {}).unwrap();
        worker.join().unwrap();

        assert_eq!(worker.join(), Err(JoinError::NotJoinable));
        assert_eq!(worker.detach(), Err(DetachError::NotJoinable));
    }

    #[test]
    fn detach_returns_without_waiting() {
        let mut worker = DllThread::spawn(|| thread::sleep(Duration::from_secs(2))).unwrap();

        let start = Instant::now();
        worker.detach().unwrap();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!worker.joinable());
        assert_eq!(worker.join(), Err(JoinError::NotJoinable));
    }

    #[test]
    fn detached_worker_still_runs_its_work() {
        let (tx, rx) = mpsc::channel();
        let mut worker = DllThread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            tx.send(()).unwrap();
        })
        .unwrap();

        worker.detach().unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn id_matches_the_worker_thread() {
        let (tx, rx) = mpsc::channel();
        let mut worker = Builder::new()
            .spawn_on::<TestPlatform, _>(move || tx.send(thread::current().id()).unwrap())
            .unwrap();

        let id = worker.id();
        let native = worker.native_handle().map(|handle| handle.id());
        worker.join().unwrap();

        let reported = rx.recv().unwrap();
        assert_eq!(id, Some(reported));
        assert_eq!(native, Some(reported));
    }

    #[test]
    fn self_join_reports_deadlock_without_blocking() {
        let slot: Arc<Mutex<Option<DllThread>>> = Arc::new(Mutex::new(None));
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let (result_tx, result_rx) = mpsc::channel();

        let worker_slot = Arc::clone(&slot);
        let worker = DllThread::spawn(move || {
            go_rx.recv().unwrap();
            let mut guard = worker_slot.lock().unwrap();
            let this = guard.as_mut().unwrap();
            let result = this.join();
            result_tx.send((result, this.joinable())).unwrap();
        })
        .unwrap();

        *slot.lock().unwrap() = Some(worker);
        go_tx.send(()).unwrap();

        let (result, joinable) = result_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result, Err(JoinError::Deadlock));
        assert!(joinable);

        let mut worker = slot.lock().unwrap().take().unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn drop_on_the_worker_thread_detaches() {
        let slot: Arc<Mutex<Option<DllThread>>> = Arc::new(Mutex::new(None));
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel();

        let worker_slot = Arc::clone(&slot);
        let worker = DllThread::spawn(move || {
            go_rx.recv().unwrap();
            let this = worker_slot.lock().unwrap().take();
            drop(this);
            done_tx.send(()).unwrap();
        })
        .unwrap();

        *slot.lock().unwrap() = Some(worker);
        go_tx.send(()).unwrap();

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(slot.lock().unwrap().is_none());
    }

    #[test]
    fn started_worker_outliving_the_startup_timeout_is_not_cancelled() {
        let counter = Arc::new(AtomicUsize::new(0));
        let worker_counter = Arc::clone(&counter);

        let mut worker = test_builder()
            .spawn(move || {
                thread::sleep(Duration::from_millis(300));
                worker_counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        worker.join().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn running_worker_that_signals_late_is_waited_for() {
        testing::delay_start_signal(Some(Duration::from_millis(200)));
        let counter = Arc::new(AtomicUsize::new(0));
        let worker_counter = Arc::clone(&counter);

        let mut worker = test_builder()
            .spawn_on::<TestPlatform, _>(move || {
                worker_counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        worker.join().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(testing::ledger().live(), 0);
    }

    #[test]
    fn suspend_failure_falls_back_to_waiting() {
        testing::delay_start_signal(Some(Duration::from_millis(200)));
        testing::fail_at(Some(Step::Suspend));
        let counter = Arc::new(AtomicUsize::new(0));
        let worker_counter = Arc::clone(&counter);

        let mut worker = test_builder()
            .spawn_on::<TestPlatform, _>(move || {
                worker_counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        worker.join().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn worker_that_never_starts_is_cancelled() {
        testing::hold_threads(true);
        let counter = Arc::new(AtomicUsize::new(0));
        let worker_counter = Arc::clone(&counter);

        let mut worker = test_builder()
            .spawn_on::<TestPlatform, _>(move || {
                worker_counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(testing::ledger().live(), 3);

        let start = Instant::now();
        worker.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!worker.joinable());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        // The record, and the closure in it, was freed by the join.
        assert_eq!(Arc::strong_count(&counter), 1);
        assert_eq!(testing::ledger().live(), 0);
    }

    #[test]
    fn failed_termination_lets_the_worker_skip_its_work() {
        testing::hold_threads(true);
        testing::fail_at(Some(Step::Terminate));
        let counter = Arc::new(AtomicUsize::new(0));
        let worker_counter = Arc::clone(&counter);

        let mut worker = test_builder()
            .spawn_on::<TestPlatform, _>(move || {
                worker_counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        worker.join().unwrap();
        assert!(!worker.joinable());

        // The resumed worker frees the record on its own.
        assert!(eventually(|| Arc::strong_count(&counter) == 1));
        assert!(eventually(|| testing::ledger().live() == 0));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn worker_exiting_without_start_signal_is_reclaimed() {
        testing::fail_at(Some(Step::SetEvent));
        let counter = Arc::new(AtomicUsize::new(0));
        let worker_counter = Arc::clone(&counter);

        let mut worker = test_builder()
            .spawn_on::<TestPlatform, _>(move || {
                worker_counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        worker.join().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(Arc::strong_count(&counter), 1);
        assert_eq!(testing::ledger().live(), 0);
    }

    #[test]
    fn suspended_worker_that_already_signaled_is_resumed_and_waited_for() {
        testing::freeze_after_signal(true);
        let counter = Arc::new(AtomicUsize::new(0));
        let worker_counter = Arc::clone(&counter);

        let mut worker = test_builder()
            .spawn_on::<TestPlatform, _>(move || {
                worker_counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        worker.join().unwrap();

        // Not terminated: the work ran, and the worker freed the record.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(Arc::strong_count(&counter), 1);
        assert_eq!(testing::ledger().live(), 0);
    }

    #[test]
    fn failed_start_up_poll_resumes_and_waits() {
        testing::freeze_after_signal(true);
        testing::fail_at(Some(Step::PollEvent));
        let counter = Arc::new(AtomicUsize::new(0));
        let worker_counter = Arc::clone(&counter);

        let mut worker = test_builder()
            .spawn_on::<TestPlatform, _>(move || {
                worker_counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        worker.join().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(Arc::strong_count(&counter), 1);
        assert_eq!(testing::ledger().live(), 0);
    }

    #[test]
    fn suspended_worker_that_exited_without_signal_is_reclaimed() {
        testing::freeze_after_signal(true);
        testing::fail_at(Some(Step::SetEvent));
        let counter = Arc::new(AtomicUsize::new(0));
        let worker_counter = Arc::clone(&counter);

        let mut worker = test_builder()
            .spawn_on::<TestPlatform, _>(move || {
                worker_counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        worker.join().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        // Freed exactly once, by the join.
        assert_eq!(Arc::strong_count(&counter), 1);
        assert_eq!(testing::ledger().live(), 0);
    }

    #[test]
    fn spawn_failure_releases_everything() {
        let cases = [
            (Step::CreateEvent, "CreateEvent"),
            (Step::DuplicateEvent, "DuplicateEvent"),
            (Step::Spawn, "CreateThread"),
        ];

        for (step, variant) in cases {
            testing::fail_at(Some(step));
            let counter = Arc::new(AtomicUsize::new(0));
            let worker_counter = Arc::clone(&counter);

            let err = Builder::new()
                .spawn_on::<TestPlatform, _>(move || {
                    worker_counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap_err();

            assert!(format!("{err:?}").starts_with(variant), "{step:?}: {err:?}");
            assert_eq!(err.io_error().kind(), std::io::ErrorKind::Other);
            assert_eq!(Arc::strong_count(&counter), 1, "{step:?}");
            assert_eq!(counter.load(Ordering::SeqCst), 0, "{step:?}");
            assert_eq!(testing::ledger().live(), 0, "{step:?}");
        }
        testing::fail_at(None);
    }

    #[test]
    fn join_closes_every_handle() {
        let mut worker = Builder::new().spawn_on::<TestPlatform, _>(|| {}).unwrap();
        worker.join().unwrap();

        assert!(eventually(|| testing::ledger().live() == 0));
    }

    #[test]
    fn panicking_work_is_joined_normally() {
        let mut worker = DllThread::spawn(|| panic!("work unit failed")).unwrap();
        assert_eq!(worker.join(), Ok(()));
    }

    #[test]
    fn drop_joins_the_worker() {
        let counter = Arc::new(AtomicUsize::new(0));
        let worker_counter = Arc::clone(&counter);

        let worker = DllThread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            worker_counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        drop(worker);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn assignment_joins_the_previous_worker() {
        let counter = Arc::new(AtomicUsize::new(0));
        let first_counter = Arc::clone(&counter);

        let mut worker = DllThread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            first_counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(worker.joinable());

        worker = DllThread::spawn(|| {}).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(worker.joinable());
        worker.join().unwrap();
    }

    #[test]
    fn default_is_not_joinable() {
        let mut worker = DllThread::<TestPlatform>::default();

        assert!(!worker.joinable());
        assert!(worker.id().is_none());
        assert!(worker.native_handle().is_none());
        assert_eq!(worker.startup_timeout(), DEFAULT_STARTUP_TIMEOUT);
        assert_eq!(worker.join(), Err(JoinError::NotJoinable));
        assert_eq!(worker.detach(), Err(DetachError::NotJoinable));
    }

    #[test]
    fn take_leaves_a_non_joinable_source() {
        let mut source = DllThread::spawn(|| {}).unwrap();
        let id = source.id();

        let mut target = mem::take(&mut source);

        assert!(!source.joinable());
        assert_eq!(target.id(), id);
        target.join().unwrap();
    }

    #[test]
    fn available_parallelism_is_at_least_one() {
        assert!(available_parallelism() >= 1);
    }
}
