//! Integration test: module resolution and GOT access against the live loader
//!
//! Uses the C library already mapped into the test process, so nothing is
//! loaded and no slot changes value.
//!
//! Run: cargo test -p iocancel-abi --test got_test

#![cfg(all(
    target_os = "linux",
    target_env = "gnu",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]

use iocancel_abi::posix::got::{ElfLocator, ElfModule};
use iocancel_core::{
    DispatchTable, HookError, HookSpec, OriginalFn, SlotFault, patch_symbols, resolve_target,
};

const LIBC: &str = "libc.so.6";

/// Symbols the C library binds from the dynamic loader on common glibc builds.
const LOADER_IMPORTS: &[&str] = &[
    "_dl_exception_create",
    "__tls_get_addr",
    "_dl_find_object",
    "__libc_enable_secure",
    "_rtld_global_ro",
];

static UNUSED_ORIGINAL: OriginalFn = OriginalFn::empty();

extern "C" fn never_called() {}

#[test]
fn first_loaded_candidate_wins() {
    let resolved = resolve_target(
        "primary",
        &["libiocancel-missing.so.2", LIBC, "libm.so.6"],
        &ElfLocator,
    )
    .unwrap();
    assert_eq!(resolved.name, LIBC);
    assert!(resolved.table.base() > 0);
}

#[test]
fn nothing_loaded_is_a_resolution_error() {
    let err = resolve_target(
        "primary",
        &["libclntsh.so.12.1", "libclntsh.so.11.1"],
        &ElfLocator,
    )
    .err()
    .unwrap();
    assert!(matches!(err, HookError::Resolution { .. }));
    let message = err.to_string();
    assert!(message.contains("No shared library is found to hook"));
    assert!(message.contains("libclntsh.so.11.1"));
}

#[test]
fn unimported_symbol_fails_without_touching_memory() {
    let mut module = ElfModule::open(LIBC).unwrap();
    let specs = [HookSpec::new(
        "iocancel_not_a_libc_import",
        never_called as usize,
        &UNUSED_ORIGINAL,
    )];
    let err = patch_symbols(LIBC, &mut module, &specs).unwrap_err();
    match err {
        HookError::Patch { symbol, cause, .. } => {
            assert_eq!(symbol, "iocancel_not_a_libc_import");
            assert_eq!(cause, SlotFault::SymbolAbsent);
        }
        other => panic!("expected a patch error, got {other:?}"),
    }
    assert_eq!(UNUSED_ORIGINAL.get(), None);
}

#[test]
fn loader_import_slots_rewrite_in_place() {
    let mut module = ElfModule::open(LIBC).unwrap();
    let found = LOADER_IMPORTS.iter().find_map(|&symbol| {
        let plan = module.plan(symbol).ok()?;
        (!plan.slots.is_empty()).then_some((symbol, plan))
    });
    let Some((symbol, plan)) = found else {
        eprintln!("Skipping: {LIBC} binds none of {LOADER_IMPORTS:?} through its GOT");
        return;
    };

    assert_ne!(plan.original, 0, "{symbol} should already be bound");
    for record in &plan.slots {
        assert_eq!(record.address % std::mem::size_of::<usize>(), 0);
    }
    // Writing every slot's current value back goes through the same
    // protection dance as a real patch, RELRO pages included.
    module.restore(&plan).unwrap();
    let again = module.plan(symbol).unwrap();
    assert_eq!(again.slots, plan.slots);
}
