//! Handle types.
//!
//! Kernel object handles are *owned*: a handle value is closed exactly once,
//! when the owning Rust value is dropped. Duplicating a handle produces a
//! second, independently owned handle that refers to the same kernel object;
//! the object is destroyed only once every handle to it has been closed.

use windows_sys::Win32::{
    Foundation::{CloseHandle, DUPLICATE_SAME_ACCESS, DuplicateHandle, HANDLE},
    System::Threading::GetCurrentProcess,
};

use crate::result::Error;

/// Raw Win32 handle value.
pub type RawHandle = HANDLE;

/// A trait for types that can be waited on by the kernel.
pub trait Waitable: _priv::Sealed {
    /// Returns the raw handle of the waitable object.
    fn raw_handle(&self) -> RawHandle;
}

/// An owned kernel object handle, closed on drop.
#[derive(Debug)]
#[repr(transparent)]
pub struct OwnedHandle(RawHandle);

// SAFETY: Kernel handles are process-wide values; they may be used and closed
// from any thread.
unsafe impl Send for OwnedHandle {}
// SAFETY: All operations performed through a shared reference are
// thread-safe kernel calls.
unsafe impl Sync for OwnedHandle {}

impl OwnedHandle {
    /// Takes ownership of a raw handle.
    ///
    /// # Safety
    ///
    /// `raw` must be a valid, open handle that is not owned by anything else.
    /// It will be closed when the returned value is dropped.
    pub unsafe fn from_raw(raw: RawHandle) -> Self {
        Self(raw)
    }

    /// Returns the raw handle value without giving up ownership.
    pub fn as_raw(&self) -> RawHandle {
        self.0
    }

    /// Duplicates the handle within the current process, with the same
    /// access rights.
    ///
    /// This is the Rust counterpart of `DuplicateHandle(GetCurrentProcess(),
    /// h, GetCurrentProcess(), &dup, 0, FALSE, DUPLICATE_SAME_ACCESS)`.
    pub fn duplicate(&self) -> Result<Self, DuplicateHandleError> {
        let mut dup: RawHandle = core::ptr::null_mut();

        // SAFETY: `self.0` is a valid open handle and `dup` is a valid out
        // pointer. `GetCurrentProcess` returns a pseudo-handle that does not
        // need to be closed.
        let ok = unsafe {
            let process = GetCurrentProcess();
            DuplicateHandle(
                process,
                self.0,
                process,
                &mut dup,
                0,
                0,
                DUPLICATE_SAME_ACCESS,
            )
        };
        if ok == 0 {
            return Err(DuplicateHandleError(Error::last()));
        }

        Ok(Self(dup))
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        // SAFETY: We own the handle and it has not been closed yet.
        // A failure here means the handle was already invalid; there is
        // nothing left to release.
        unsafe { CloseHandle(self.0) };
    }
}

/// Error type for [`OwnedHandle::duplicate`].
#[derive(Debug, thiserror::Error)]
#[error("DuplicateHandle failed: {0}")]
pub struct DuplicateHandleError(pub Error);

impl From<DuplicateHandleError> for std::io::Error {
    fn from(value: DuplicateHandleError) -> Self {
        value.0.into()
    }
}

/// Internal macro to generate owned handle newtypes that are also
/// [`Waitable`].
///
/// The generated type wraps an [`OwnedHandle`], so it closes its handle on
/// drop, and can be duplicated with `try_clone`.
macro_rules! define_waitable_handle_type {
    {
        $(#[$meta:meta])* $vis:vis struct $name:ident
    } => {
        $(#[$meta])*
        #[derive(Debug)]
        #[repr(transparent)]
        $vis struct $name($crate::handle::OwnedHandle);

        impl $name {
            /// Takes ownership of a raw handle.
            ///
            /// # Safety
            ///
            /// Caller must guarantee that the raw handle is valid, refers to
            /// the right kind of kernel object and is not owned elsewhere.
            pub unsafe fn from_raw(raw: $crate::handle::RawHandle) -> Self {
                // SAFETY: Guaranteed by the caller.
                Self(unsafe { $crate::handle::OwnedHandle::from_raw(raw) })
            }

            /// Returns the raw handle value without giving up ownership.
            pub fn as_raw(&self) -> $crate::handle::RawHandle {
                self.0.as_raw()
            }

            /// Duplicates the handle within the current process.
            pub fn try_clone(&self) -> Result<Self, $crate::handle::DuplicateHandleError> {
                self.0.duplicate().map(Self)
            }
        }

        impl $crate::handle::Waitable for $name {
            #[inline]
            fn raw_handle(&self) -> $crate::handle::RawHandle {
                self.0.as_raw()
            }
        }

        impl $crate::handle::_priv::Sealed for $name {}
    };
}

#[allow(dead_code)]
pub(crate) mod _priv {
    /// A trait that is sealed to prevent external implementations.
    pub trait Sealed {}
}
