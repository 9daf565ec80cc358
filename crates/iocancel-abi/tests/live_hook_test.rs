//! Integration test: hooking `read` inside a freshly loaded shared object
//!
//! The fixture library (built by `build.rs`) forwards `fixture_read` to its
//! own `read` import. Installing a hook set over it must route that import
//! through `hook_read`, forward to the real `read`, and leave the call
//! interruptible by a broadcast. Two builds cover the two ways the slot can
//! look at install time:
//!
//! - lazy PLT: the `JUMP_SLOT` still points into the object, so the original
//!   comes from `dlsym`, and the slot page is writable;
//! - `-fno-plt -z now -z relro`: a bound `GLOB_DAT` entry on a read-only
//!   RELRO page, rewritten under `mprotect`.
//!
//! Run: cargo test -p iocancel-abi --test live_hook_test

#![cfg(all(
    target_os = "linux",
    target_env = "gnu",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]

use std::ffi::{CString, c_int, c_void};
use std::thread;
use std::time::{Duration, Instant};

use iocancel_abi::posix::got::ElfLocator;
use iocancel_abi::posix::stubs::{ORIGINAL_READ, hook_read};
use iocancel_core::{HookSet, HookSpec, InstallOutcome, InstallPolicy};

type FixtureRead = unsafe extern "C" fn(c_int, *mut c_void, usize) -> isize;

struct Fixture {
    path: &'static str,
    read: FixtureRead,
}

fn load_fixture(path: Option<&'static str>, flags: c_int) -> Fixture {
    let path = path.expect("fixture library was not built; build.rs needs a C compiler");
    let c_path = CString::new(path).unwrap();
    let handle = unsafe { libc::dlopen(c_path.as_ptr(), flags) };
    assert!(!handle.is_null(), "dlopen {path} failed");
    let sym = unsafe { libc::dlsym(handle, c"fixture_read".as_ptr()) };
    assert!(!sym.is_null(), "fixture_read missing from {path}");
    Fixture {
        path,
        read: unsafe { std::mem::transmute::<*mut c_void, FixtureRead>(sym) },
    }
}

fn socket_pair() -> [c_int; 2] {
    let mut fds = [0 as c_int; 2];
    let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "socketpair failed");
    fds
}

fn close_pair(fds: [c_int; 2]) {
    unsafe {
        libc::close(fds[0]);
        libc::close(fds[1]);
    }
}

fn wait_for_active(expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while iocancel_abi::active_io_count() != expected {
        assert!(
            Instant::now() < deadline,
            "registry never reached {expected} entries (at {})",
            iocancel_abi::active_io_count()
        );
        thread::sleep(Duration::from_millis(5));
    }
}

// ---------------------------------------------------------------------------
// Install, forward, cancel
// ---------------------------------------------------------------------------

fn install_over(fixture: &Fixture) {
    let candidates: &'static [&'static str] = Box::leak(Box::new([fixture.path]));
    let set = HookSet::new(
        "fixture",
        candidates,
        vec![HookSpec::new("read", hook_read as usize, &ORIGINAL_READ)],
        InstallPolicy::Eager,
    );

    match set.install(&ElfLocator).unwrap() {
        InstallOutcome::Installed { module, report } => {
            assert_eq!(module, fixture.path);
            assert_eq!(report.symbols, 1);
            assert!(report.slots >= 1, "no slot rewritten in {}", fixture.path);
        }
        other => panic!("expected a fresh install, got {other:?}"),
    }

    let real_read = unsafe { libc::dlsym(libc::RTLD_DEFAULT, c"read".as_ptr()) };
    assert_eq!(ORIGINAL_READ.get(), Some(real_read as usize));
}

fn read_goes_through_stub(fixture: &Fixture) {
    let fds = socket_pair();
    let payload = b"hello";
    assert_eq!(
        unsafe { libc::write(fds[1], payload.as_ptr().cast(), payload.len()) },
        5
    );

    let before = iocancel_abi::metrics().stub_calls;
    let mut buf = [0u8; 16];
    let n = unsafe { (fixture.read)(fds[0], buf.as_mut_ptr().cast(), buf.len()) };
    let after = iocancel_abi::metrics().stub_calls;

    assert_eq!(n, 5);
    assert_eq!(&buf[..5], payload);
    assert_eq!(after - before, 1, "{} did not call through the stub", fixture.path);
    assert_eq!(iocancel_abi::active_io_count(), 0);
    close_pair(fds);
}

fn blocked_read_is_cancelled(fixture: &Fixture) {
    let fds = socket_pair();
    let read = fixture.read;
    let fd = fds[0];
    let reader = thread::spawn(move || {
        let mut buf = [0u8; 16];
        unsafe { read(fd, buf.as_mut_ptr().cast(), buf.len()) }
    });

    wait_for_active(1);
    thread::sleep(Duration::from_millis(50));

    let report = iocancel_abi::cancel_all_active_io();
    assert_eq!(report.visited, 1);
    assert_eq!(report.issued, 1);
    assert_eq!(report.failed, 0);

    assert_eq!(reader.join().unwrap(), 0, "read should see EOF");
    assert_eq!(iocancel_abi::active_io_count(), 0);
    close_pair(fds);
}

fn exercise(fixture: &Fixture) {
    install_over(fixture);
    read_goes_through_stub(fixture);
    blocked_read_is_cancelled(fixture);
}

// Both builds share the process-wide registry and counters, so they run
// one after the other in a single test.
#[test]
fn fixture_read_is_hooked_and_cancellable() {
    let lazy = load_fixture(option_env!("IOCANCEL_FIXTURE_LAZY"), libc::RTLD_LAZY);
    exercise(&lazy);

    let now = load_fixture(option_env!("IOCANCEL_FIXTURE_NOW"), libc::RTLD_NOW);
    exercise(&now);
}
