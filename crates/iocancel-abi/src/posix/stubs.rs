//! Interceptor stub for `read(2)`.
//!
//! The stub registers its descriptor, calls the real `read`, and
//! unregisters before returning the untouched result. `errno` is saved
//! right after the real call and put back after unregistering, so the
//! registry lock can never clobber it.

use std::ffi::{c_int, c_void};

use iocancel_core::{HookMetrics, IoHandle, OriginalFn, global_metrics};

use crate::service::ACTIVE_IO;

/// `read` as the client library bound it, captured when its slot is patched.
pub static ORIGINAL_READ: OriginalFn = OriginalFn::empty();

type ReadFn = unsafe extern "C" fn(c_int, *mut c_void, libc::size_t) -> libc::ssize_t;

fn original_read() -> ReadFn {
    match ORIGINAL_READ.get() {
        // SAFETY: only ever captured from a slot bound to `read`.
        Some(addr) => unsafe { std::mem::transmute::<usize, ReadFn>(addr) },
        None => libc::read,
    }
}

/// Replacement for the client library's `read` import.
///
/// # Safety
///
/// Same contract as `read(2)`.
pub unsafe extern "C" fn hook_read(fd: c_int, buf: *mut c_void, count: libc::size_t) -> libc::ssize_t {
    let call = ACTIVE_IO.enter(IoHandle::from_fd(fd));
    let metrics = global_metrics();
    HookMetrics::inc(&metrics.stub_calls);
    metrics.observe_active(call.active_at_entry());

    let ret = unsafe { original_read()(fd, buf, count) };
    let saved = super::errno();

    drop(call);
    super::set_errno(saved);
    ret
}
