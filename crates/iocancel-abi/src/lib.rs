// The C exports take no pointers and the stubs keep the contract of the
// functions they replace, so per-function safety docs would only repeat it.
#![allow(clippy::missing_safety_doc)]
//! # iocancel-abi
//!
//! Platform layer that makes a database driver's blocking network reads
//! interruptible from another thread.
//!
//! The driver's client library imports its receive primitive through an
//! import table (GOT/PLT on ELF, IAT on PE). Installing the hooks points
//! those slots at interceptor stubs, which register the handle for the
//! duration of the real call. A cancellation broadcast then interrupts
//! every registered handle.
//!
//! ```text
//! driver -> client library -> slot -> stub -> registry enter -> real read -> leave
//!                                                  ^
//! canceller -> cancel_all_active_io ---------------+--> shutdown / CancelIoEx
//! ```
//!
//! The same operations are exported to C as `iocancel_*` functions.

#[cfg(unix)]
pub mod posix;
#[cfg(unix)]
use posix as platform;

#[cfg(windows)]
pub mod windows;
#[cfg(windows)]
use windows as platform;

#[cfg(not(any(unix, windows)))]
mod unsupported;
#[cfg(not(any(unix, windows)))]
use unsupported as platform;

pub mod ffi;
mod service;

pub use iocancel_core::{
    CancelReport, HookError, InstallOutcome, IoHandle, LazyStatus, MetricsSnapshot,
};
pub use service::{HookService, service};

/// Hook the primary set into the driver's client library.
///
/// Fails if no candidate library is loaded or a slot cannot be rewritten;
/// the library is left untouched in that case.
pub fn install_hooks() -> Result<InstallOutcome, HookError> {
    service().install_hooks()
}

/// Hook the lazily loaded set if its library is now present.
///
/// Cheap once installed. Failures are absorbed and retried on the next call.
pub fn ensure_lazy_hooks_installed() -> LazyStatus {
    service().ensure_lazy_hooks_installed()
}

/// Interrupt every blocking call currently inside a stub.
pub fn cancel_all_active_io() -> CancelReport {
    service().cancel_all_active_io()
}

/// Number of calls currently inside a stub.
pub fn active_io_count() -> usize {
    service().active_io_count()
}

pub fn metrics() -> MetricsSnapshot {
    service().metrics()
}
