//! Windows backend: IAT rewrite in the driver's network DLLs and
//! `CancelIoEx` as the interrupt primitive.
//!
//! TCP connections receive through `WSARecv` imported by the primary DLLs.
//! Bequeath connections read a pipe through `ReadFile` in a DLL that is only
//! loaded on first use, hence the lazy set. `CancelIoEx` is looked up once;
//! when the host lacks it nothing could interrupt a pipe read, so the lazy
//! set is not built at all and every broadcast visit is a no-op.

use std::sync::OnceLock;

use iocancel_core::{
    HookError, HookSet, HookSpec, InstallOutcome, InstallPolicy, InterruptOutcome, Interrupter,
    IoHandle, LazyStatus,
};
use windows_sys::Win32::Foundation::{BOOL, GetLastError, HANDLE};
use windows_sys::Win32::System::IO::OVERLAPPED;
use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};

pub mod iat;
pub mod stubs;

/// Net8 TCP adapter and instant-client builds, newest first.
pub const PRIMARY_CANDIDATES: &[&str] = &[
    "orantcp12.dll",
    "orantcp11.dll",
    "orantcp10.dll",
    "orantcp9.dll",
    "oraociei12.dll",
    "oraociei11.dll",
    "oraociei10.dll",
    "oraociicus12.dll",
    "oraociicus11.dll",
    "oraociicus10.dll",
];

/// Bequeath adapter builds, newest first.
pub const LAZY_CANDIDATES: &[&str] = &[
    "oranbeq12.dll",
    "oranbeq11.dll",
    "oranbeq10.dll",
    "oranbeq9.dll",
];

pub(crate) fn primary_hook_set() -> HookSet {
    HookSet::new(
        "primary",
        PRIMARY_CANDIDATES,
        vec![HookSpec::new(
            "WSARecv",
            stubs::hook_wsarecv as usize,
            &stubs::ORIGINAL_WSARECV,
        )],
        InstallPolicy::Eager,
    )
}

pub(crate) fn lazy_hook_set() -> Option<HookSet> {
    cancel_io_ex()?;
    Some(HookSet::new(
        "lazy",
        LAZY_CANDIDATES,
        vec![HookSpec::new(
            "ReadFile",
            stubs::hook_readfile as usize,
            &stubs::ORIGINAL_READFILE,
        )],
        InstallPolicy::Lazy,
    ))
}

pub(crate) fn install(set: &HookSet) -> Result<InstallOutcome, HookError> {
    set.install(&iat::PeLocator)
}

pub(crate) fn ensure_installed(set: &HookSet) -> LazyStatus {
    set.ensure_installed(&iat::PeLocator)
}

type CancelIoExFn = unsafe extern "system" fn(HANDLE, *const OVERLAPPED) -> BOOL;

static CANCEL_IO_EX: OnceLock<Option<CancelIoExFn>> = OnceLock::new();

/// `CancelIoEx`, if this Windows has it (Vista and later).
pub fn cancel_io_ex() -> Option<CancelIoExFn> {
    *CANCEL_IO_EX.get_or_init(|| {
        // SAFETY: KERNEL32 is mapped into every process; GetProcAddress
        // returns either null or the named export.
        unsafe {
            let kernel32 = GetModuleHandleA(c"KERNEL32.DLL".as_ptr().cast());
            if kernel32.is_null() {
                return None;
            }
            GetProcAddress(kernel32, c"CancelIoEx".as_ptr().cast())
                .map(|f| std::mem::transmute::<unsafe extern "system" fn() -> isize, CancelIoExFn>(f))
        }
    })
}

/// Cancels all outstanding I/O of every thread on a handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CancelPendingIo;

impl Interrupter for CancelPendingIo {
    fn interrupt(&self, handle: IoHandle) -> InterruptOutcome {
        let Some(cancel) = cancel_io_ex() else {
            return InterruptOutcome::Unsupported;
        };
        // SAFETY: CancelIoEx on a stale or foreign handle fails with
        // ERROR_INVALID_HANDLE or ERROR_NOT_FOUND.
        let ok = unsafe { cancel(handle.as_raw() as HANDLE, std::ptr::null()) };
        if ok != 0 {
            InterruptOutcome::Issued
        } else {
            // SAFETY: reads the calling thread's last-error value.
            InterruptOutcome::Failed(unsafe { GetLastError() } as i32)
        }
    }
}

pub(crate) fn interrupter() -> CancelPendingIo {
    CancelPendingIo
}
