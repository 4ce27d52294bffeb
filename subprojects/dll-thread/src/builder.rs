//! Worker configuration.

use core::time::Duration;

use crate::{
    error::SpawnError,
    platform::Platform,
    sys::DefaultPlatform,
    thread::DllThread,
};

/// How long [`DllThread::join`] waits for a worker to signal start-up before
/// it suspects a loader-lock deadlock.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Thread factory, used to configure a [`DllThread`] before spawning it.
///
/// ```ignore
/// let worker = Builder::new()
///     .startup_timeout(Duration::from_millis(500))
///     .stack_size(64 * 1024)
///     .spawn(|| refresh_cache())?;
/// ```
#[derive(Debug, Clone)]
#[must_use = "must eventually spawn the thread"]
pub struct Builder {
    startup_timeout: Duration,
    stack_size: Option<usize>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// Creates a builder with the default start-up timeout and the
    /// platform's default stack size.
    pub const fn new() -> Self {
        Self {
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            stack_size: None,
        }
    }

    /// Sets how long `join` waits for the worker to signal start-up before
    /// trying to cancel it.
    pub const fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Sets the stack size of the worker, in bytes.
    ///
    /// On Windows this is the stack reservation; the OS rounds it up.
    pub const fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Spawns a worker on the default platform.
    pub fn spawn<F>(self, f: F) -> Result<DllThread, SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_on::<DefaultPlatform, F>(f)
    }

    /// Spawns a worker on the platform `P`.
    pub fn spawn_on<P, F>(self, f: F) -> Result<DllThread<P>, SpawnError>
    where
        P: Platform,
        F: FnOnce() + Send + 'static,
    {
        DllThread::spawn_with(Box::new(f), self.startup_timeout, self.stack_size)
    }
}
