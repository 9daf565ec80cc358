//! C exports for drivers written as C extensions.
//!
//! Failures set a thread-local message that `iocancel_last_error` hands out
//! once, `dlerror`-style.

use std::cell::RefCell;
use std::ffi::{CString, c_char, c_int};

use iocancel_core::LazyStatus;

use crate::service::service;

// ---------------------------------------------------------------------------
// Thread-local error state
// ---------------------------------------------------------------------------

std::thread_local! {
    /// Message not yet read by the caller.
    static PENDING_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
    /// Message last handed out; kept until the next read on this thread.
    static RETURNED_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
    /// Last JSON document handed out by `iocancel_metrics_json`.
    static METRICS_JSON: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(message: &str) {
    // Interior NULs cannot come from our Display impls; strip them anyway.
    let text = CString::new(message.replace('\0', "")).unwrap_or_default();
    PENDING_ERROR.with(|slot| *slot.borrow_mut() = Some(text));
}

fn clear_last_error() {
    PENDING_ERROR.with(|slot| *slot.borrow_mut() = None);
}

fn clamp(n: usize) -> c_int {
    c_int::try_from(n).unwrap_or(c_int::MAX)
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Hook the primary set. Returns 0 on success (including when already
/// installed) and -1 on failure, with the reason in `iocancel_last_error`.
#[unsafe(no_mangle)]
pub extern "C" fn iocancel_install_hooks() -> c_int {
    match service().install_hooks() {
        Ok(_) => {
            clear_last_error();
            0
        }
        Err(err) => {
            set_last_error(&err.to_string());
            -1
        }
    }
}

/// Returns 1 when nothing is left to install (installed, or lazy hooks are
/// off on this host) and 0 when a later call should retry.
#[unsafe(no_mangle)]
pub extern "C" fn iocancel_ensure_lazy_hooks_installed() -> c_int {
    match service().ensure_lazy_hooks_installed() {
        LazyStatus::Installed | LazyStatus::Disabled => 1,
        LazyStatus::Deferred => 0,
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Interrupt every blocked call. Returns the number of handles visited.
#[unsafe(no_mangle)]
pub extern "C" fn iocancel_cancel_all_active_io() -> c_int {
    clamp(service().cancel_all_active_io().visited)
}

#[unsafe(no_mangle)]
pub extern "C" fn iocancel_active_io_count() -> c_int {
    clamp(service().active_io_count())
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Message for the last failure on this thread, or null. Reading clears it;
/// the pointer stays valid until the next call on this thread.
#[unsafe(no_mangle)]
pub extern "C" fn iocancel_last_error() -> *const c_char {
    let pending = PENDING_ERROR.with(|slot| slot.borrow_mut().take());
    RETURNED_ERROR.with(|slot| {
        let mut slot = slot.borrow_mut();
        *slot = pending;
        slot.as_ref().map_or(std::ptr::null(), |msg| msg.as_ptr())
    })
}

/// Counter snapshot as a JSON object, or null if it cannot be encoded. The
/// pointer stays valid until the next call on this thread.
#[unsafe(no_mangle)]
pub extern "C" fn iocancel_metrics_json() -> *const c_char {
    let encoded = serde_json::to_string(&service().metrics())
        .ok()
        .and_then(|json| CString::new(json).ok());
    METRICS_JSON.with(|slot| {
        let mut slot = slot.borrow_mut();
        *slot = encoded;
        slot.as_ref().map_or(std::ptr::null(), |json| json.as_ptr())
    })
}
