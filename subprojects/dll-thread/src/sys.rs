//! Platform backends.

pub(crate) mod portable;
pub use self::portable::Portable;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use self::windows::Win32;

/// The backend used by [`DllThread`](crate::DllThread) unless another one is
/// named explicitly.
#[cfg(windows)]
pub type DefaultPlatform = Win32;

/// The backend used by [`DllThread`](crate::DllThread) unless another one is
/// named explicitly.
#[cfg(not(windows))]
pub type DefaultPlatform = Portable;
