//! Target module resolution.

use crate::error::HookError;
use crate::patch::DispatchTable;

/// Finds modules that are already loaded. Implementations must never load
/// anything themselves.
pub trait ModuleLocator {
    type Table: DispatchTable;

    /// The dispatch table of `candidate` if it is mapped in this process.
    fn locate(&self, candidate: &str) -> Option<Self::Table>;
}

/// A candidate that was found loaded.
#[derive(Debug)]
pub struct ResolvedModule<T> {
    pub name: &'static str,
    pub table: T,
}

/// Probe `candidates` in order and return the first one that is loaded.
pub fn resolve_target<L: ModuleLocator + ?Sized>(
    hook_set: &'static str,
    candidates: &[&'static str],
    locator: &L,
) -> Result<ResolvedModule<L::Table>, HookError> {
    candidates
        .iter()
        .find_map(|&name| {
            locator
                .locate(name)
                .map(|table| ResolvedModule { name, table })
        })
        .ok_or_else(|| HookError::Resolution {
            hook_set,
            candidates: candidates.to_vec(),
        })
}
