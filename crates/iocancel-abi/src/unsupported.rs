//! Fallback for targets with neither backend: nothing is hooked and nothing
//! can be interrupted.

use iocancel_core::{
    HookError, HookSet, InstallOutcome, InstallPolicy, InterruptOutcome, IoHandle, LazyStatus,
};

pub(crate) fn primary_hook_set() -> HookSet {
    HookSet::new("primary", &[], Vec::new(), InstallPolicy::Eager)
}

pub(crate) fn lazy_hook_set() -> Option<HookSet> {
    None
}

pub(crate) fn install(_set: &HookSet) -> Result<InstallOutcome, HookError> {
    Err(HookError::UnsupportedPlatform)
}

pub(crate) fn ensure_installed(_set: &HookSet) -> LazyStatus {
    LazyStatus::Disabled
}

pub(crate) fn interrupter() -> impl Fn(IoHandle) -> InterruptOutcome {
    |_| InterruptOutcome::Unsupported
}
