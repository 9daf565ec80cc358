//! POSIX backend: GOT/PLT slot rewrite in the driver's client library and
//! `shutdown(2)` as the interrupt primitive.
//!
//! Bequeath (local pipe) connections read through the same `read` import as
//! TCP ones, so there is no lazy hook set here.

use std::ffi::c_int;

use iocancel_core::{
    HookError, HookSet, HookSpec, InstallOutcome, InstallPolicy, InterruptOutcome, Interrupter,
    IoHandle, LazyStatus,
};

#[cfg(all(
    target_os = "linux",
    target_pointer_width = "64",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
pub mod got;
pub mod stubs;

/// Client library builds, newest first.
#[cfg(not(target_vendor = "apple"))]
pub const PRIMARY_CANDIDATES: &[&str] = &[
    "libclntsh.so.12.1",
    "libclntsh.so.11.1",
    "libclntsh.so.10.1",
    "libclntsh.so.9.0",
];

#[cfg(target_vendor = "apple")]
pub const PRIMARY_CANDIDATES: &[&str] = &[
    "libclntsh.dylib.12.1",
    "libclntsh.dylib.11.1",
    "libclntsh.dylib.10.1",
    "libclntsh.dylib.9.0",
];

pub(crate) fn primary_hook_set() -> HookSet {
    HookSet::new(
        "primary",
        PRIMARY_CANDIDATES,
        vec![HookSpec::new(
            "read",
            stubs::hook_read as usize,
            &stubs::ORIGINAL_READ,
        )],
        InstallPolicy::Eager,
    )
}

pub(crate) fn lazy_hook_set() -> Option<HookSet> {
    None
}

#[cfg(all(
    target_os = "linux",
    target_pointer_width = "64",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
pub(crate) fn install(set: &HookSet) -> Result<InstallOutcome, HookError> {
    set.install(&got::ElfLocator)
}

#[cfg(not(all(
    target_os = "linux",
    target_pointer_width = "64",
    any(target_arch = "x86_64", target_arch = "aarch64")
)))]
pub(crate) fn install(_set: &HookSet) -> Result<InstallOutcome, HookError> {
    Err(HookError::UnsupportedPlatform)
}

#[cfg(all(
    target_os = "linux",
    target_pointer_width = "64",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
pub(crate) fn ensure_installed(set: &HookSet) -> LazyStatus {
    set.ensure_installed(&got::ElfLocator)
}

#[cfg(not(all(
    target_os = "linux",
    target_pointer_width = "64",
    any(target_arch = "x86_64", target_arch = "aarch64")
)))]
pub(crate) fn ensure_installed(_set: &HookSet) -> LazyStatus {
    LazyStatus::Disabled
}

/// Interrupts a blocked `read` by shutting the socket down in both
/// directions. The descriptor stays open; its owner closes it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketShutdown;

impl Interrupter for SocketShutdown {
    fn interrupt(&self, handle: IoHandle) -> InterruptOutcome {
        // SAFETY: shutdown(2) on an arbitrary descriptor at worst fails with
        // EBADF or ENOTSOCK.
        let rc = unsafe { libc::shutdown(handle.as_fd(), libc::SHUT_RDWR) };
        if rc == 0 {
            InterruptOutcome::Issued
        } else {
            InterruptOutcome::Failed(errno())
        }
    }
}

pub(crate) fn interrupter() -> SocketShutdown {
    SocketShutdown
}

// ---------------------------------------------------------------------------
// errno
// ---------------------------------------------------------------------------

pub(crate) fn errno() -> c_int {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

pub(crate) fn set_errno(value: c_int) {
    // SAFETY: the errno location is valid for the lifetime of the thread.
    unsafe { *errno_location() = value };
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn errno_location() -> *mut c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(any(target_vendor = "apple", target_os = "freebsd", target_os = "dragonfly"))]
unsafe fn errno_location() -> *mut c_int {
    unsafe { libc::__error() }
}

#[cfg(any(target_os = "openbsd", target_os = "netbsd"))]
unsafe fn errno_location() -> *mut c_int {
    unsafe { libc::__errno() }
}
