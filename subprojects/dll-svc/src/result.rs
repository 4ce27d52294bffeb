//! Win32 error codes.
//!
//! Every failing Win32 call used by this crate reports its cause through the
//! calling thread's last-error value. [`Error`] captures that value right
//! after the failing call so it can be carried inside the typed error enums
//! of the wrapper functions.

use core::fmt;
use std::io;

use windows_sys::Win32::Foundation::GetLastError;

/// A non-zero Win32 error code, as returned by `GetLastError`.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct Error(u32);

impl Error {
    /// Captures the calling thread's last-error value.
    ///
    /// Must be called immediately after the failing Win32 call, before any
    /// other call that may overwrite the last-error value.
    pub fn last() -> Self {
        // SAFETY: `GetLastError` only reads thread-local state.
        Self::from_raw(unsafe { GetLastError() })
    }

    /// Wraps a raw Win32 error code.
    ///
    /// A zero code (`ERROR_SUCCESS`) is reported by some APIs that fail
    /// without setting the last-error value; it is kept as-is.
    pub const fn from_raw(code: u32) -> Self {
        Self(code)
    }

    /// Returns the raw Win32 error code.
    pub const fn to_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Error")
            .field(&format_args!("{:#010x}", self.0))
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "win32 error {:#010x}", self.0)
    }
}

impl core::error::Error for Error {}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        io::Error::from_raw_os_error(value.0 as i32)
    }
}
