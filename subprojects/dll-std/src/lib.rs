//! # dll-std
//!
//! Threading and locking primitives that are safe to use from a dynamic
//! library's load and unload entry points.

#[cfg(feature = "sync")]
pub mod sync {
    pub use dll_sys_sync::*;
}
#[cfg(feature = "thread")]
pub mod thread {
    pub use dll_thread::*;
}

#[cfg(all(windows, any(feature = "sys", feature = "svc")))]
pub mod sys {
    pub use dll_svc as svc;
}
