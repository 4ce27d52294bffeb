//! Error types.

use std::io;

/// Error returned when a [`DllThread`](crate::DllThread) cannot be created.
///
/// Every resource acquired before the failing step has been released when
/// this is returned, and the work closure was dropped without running.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    /// The start-up event could not be created.
    #[error("failed to create the start-up event: {0}")]
    CreateEvent(#[source] io::Error),
    /// The worker's handle to the start-up event could not be created.
    #[error("failed to duplicate the start-up event: {0}")]
    DuplicateEvent(#[source] io::Error),
    /// The OS refused to create the thread.
    #[error("failed to create the worker thread: {0}")]
    CreateThread(#[source] io::Error),
}

impl SpawnError {
    /// Returns the underlying OS error.
    pub fn io_error(&self) -> &io::Error {
        match self {
            Self::CreateEvent(err) | Self::DuplicateEvent(err) | Self::CreateThread(err) => err,
        }
    }
}

impl From<SpawnError> for io::Error {
    fn from(value: SpawnError) -> Self {
        match value {
            SpawnError::CreateEvent(err)
            | SpawnError::DuplicateEvent(err)
            | SpawnError::CreateThread(err) => err,
        }
    }
}

/// Error returned by [`DllThread::join`](crate::DllThread::join).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// The handle does not refer to a running worker: it was default
    /// constructed, already joined, or detached.
    #[error("thread is not joinable")]
    NotJoinable,
    /// `join` was called from the worker thread itself.
    #[error("a thread cannot join itself")]
    Deadlock,
}

impl From<JoinError> for io::Error {
    fn from(value: JoinError) -> Self {
        let kind = match value {
            JoinError::NotJoinable => io::ErrorKind::InvalidInput,
            JoinError::Deadlock => io::ErrorKind::Deadlock,
        };
        io::Error::new(kind, value)
    }
}

/// Error returned by [`DllThread::detach`](crate::DllThread::detach).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DetachError {
    /// The handle does not refer to a running worker.
    #[error("thread is not joinable")]
    NotJoinable,
}

impl From<DetachError> for io::Error {
    fn from(value: DetachError) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, value)
    }
}
