//! Interceptor stubs for `WSARecv` and `ReadFile`.
//!
//! Each stub registers its handle for the duration of the real call and
//! hands back the untouched result. The thread's last-error value is saved
//! right after the real call and restored after unregistering.

use iocancel_core::{HookMetrics, IoHandle, OriginalFn, global_metrics};
use windows_sys::Win32::Foundation::{BOOL, GetLastError, HANDLE, SetLastError};
use windows_sys::Win32::Networking::WinSock::{
    LPWSAOVERLAPPED_COMPLETION_ROUTINE, SOCKET, WSABUF, WSARecv,
};
use windows_sys::Win32::Storage::FileSystem::ReadFile;
use windows_sys::Win32::System::IO::OVERLAPPED;

use crate::service::ACTIVE_IO;

/// `WSARecv` as the TCP adapter bound it.
pub static ORIGINAL_WSARECV: OriginalFn = OriginalFn::empty();
/// `ReadFile` as the bequeath adapter bound it.
pub static ORIGINAL_READFILE: OriginalFn = OriginalFn::empty();

type WsaRecvFn = unsafe extern "system" fn(
    SOCKET,
    *const WSABUF,
    u32,
    *mut u32,
    *mut u32,
    *mut OVERLAPPED,
    LPWSAOVERLAPPED_COMPLETION_ROUTINE,
) -> i32;

type ReadFileFn = unsafe extern "system" fn(HANDLE, *mut u8, u32, *mut u32, *mut OVERLAPPED) -> BOOL;

fn original_wsarecv() -> WsaRecvFn {
    match ORIGINAL_WSARECV.get() {
        // SAFETY: only ever captured from an IAT slot bound to `WSARecv`.
        Some(addr) => unsafe { std::mem::transmute::<usize, WsaRecvFn>(addr) },
        None => WSARecv,
    }
}

fn original_readfile() -> ReadFileFn {
    match ORIGINAL_READFILE.get() {
        // SAFETY: only ever captured from an IAT slot bound to `ReadFile`.
        Some(addr) => unsafe { std::mem::transmute::<usize, ReadFileFn>(addr) },
        None => ReadFile,
    }
}

fn note_entry(active: usize) {
    let metrics = global_metrics();
    HookMetrics::inc(&metrics.stub_calls);
    metrics.observe_active(active);
}

/// Replacement for the TCP adapter's `WSARecv` import.
///
/// # Safety
///
/// Same contract as `WSARecv`.
pub unsafe extern "system" fn hook_wsarecv(
    socket: SOCKET,
    buffers: *const WSABUF,
    buffer_count: u32,
    received: *mut u32,
    flags: *mut u32,
    overlapped: *mut OVERLAPPED,
    completion: LPWSAOVERLAPPED_COMPLETION_ROUTINE,
) -> i32 {
    let call = ACTIVE_IO.enter(IoHandle::from_raw(socket));
    note_entry(call.active_at_entry());

    let ret = unsafe {
        original_wsarecv()(
            socket,
            buffers,
            buffer_count,
            received,
            flags,
            overlapped,
            completion,
        )
    };
    // SAFETY: thread-local read.
    let saved = unsafe { GetLastError() };

    drop(call);
    // SAFETY: thread-local write.
    unsafe { SetLastError(saved) };
    ret
}

/// Replacement for the bequeath adapter's `ReadFile` import.
///
/// # Safety
///
/// Same contract as `ReadFile`.
pub unsafe extern "system" fn hook_readfile(
    file: HANDLE,
    buffer: *mut u8,
    to_read: u32,
    read: *mut u32,
    overlapped: *mut OVERLAPPED,
) -> BOOL {
    let call = ACTIVE_IO.enter(IoHandle::from_raw(file as usize));
    note_entry(call.active_at_entry());

    let ret = unsafe { original_readfile()(file, buffer, to_read, read, overlapped) };
    // SAFETY: thread-local read.
    let saved = unsafe { GetLastError() };

    drop(call);
    // SAFETY: thread-local write.
    unsafe { SetLastError(saved) };
    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use windows_sys::Win32::Foundation::{CloseHandle, ERROR_INVALID_HANDLE};
    use windows_sys::Win32::System::Pipes::CreatePipe;

    #[test]
    fn readfile_falls_back_before_capture() {
        let mut reader: HANDLE = std::ptr::null_mut();
        let mut writer: HANDLE = std::ptr::null_mut();
        assert_ne!(
            unsafe { CreatePipe(&mut reader, &mut writer, std::ptr::null(), 0) },
            0
        );
        let payload = b"abc";
        let mut written = 0u32;
        unsafe {
            windows_sys::Win32::Storage::FileSystem::WriteFile(
                writer,
                payload.as_ptr(),
                payload.len() as u32,
                &mut written,
                std::ptr::null_mut(),
            );
        }
        assert_eq!(written, 3);

        let mut buf = [0u8; 8];
        let mut read = 0u32;
        let ok = unsafe {
            hook_readfile(
                reader,
                buf.as_mut_ptr(),
                buf.len() as u32,
                &mut read,
                std::ptr::null_mut(),
            )
        };
        assert_ne!(ok, 0);
        assert_eq!(&buf[..read as usize], payload);
        unsafe {
            CloseHandle(reader);
            CloseHandle(writer);
        }
    }

    #[test]
    fn last_error_survives_the_stub() {
        let mut buf = [0u8; 4];
        let mut read = 0u32;
        let ok = unsafe {
            hook_readfile(
                std::ptr::null_mut(),
                buf.as_mut_ptr(),
                buf.len() as u32,
                &mut read,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(ok, 0);
        assert_eq!(unsafe { GetLastError() }, ERROR_INVALID_HANDLE);
    }
}
