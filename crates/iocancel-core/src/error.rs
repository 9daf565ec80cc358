//! Error types for hook installation.
//!
//! Stubs and the cancellation path never fail; only installation reports
//! errors, and only the primary hook set propagates them to the caller.

use thiserror::Error;

use crate::elf::ElfError;
use crate::pe::PeError;

/// Failure to rewrite the dispatch slot(s) of one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotFault {
    #[error("symbol is not imported")]
    SymbolAbsent,
    #[error("slot at {address:#x} is not writable (os error {errno})")]
    NotWritable { address: usize, errno: i32 },
    #[error("malformed import tables: {0}")]
    Malformed(String),
}

impl From<ElfError> for SlotFault {
    fn from(err: ElfError) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl From<PeError> for SlotFault {
    fn from(err: PeError) -> Self {
        Self::Malformed(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    /// None of the candidate modules is loaded.
    #[cfg_attr(
        windows,
        error("No DLL is found to hook ({hook_set}: tried {})", candidates.join(", "))
    )]
    #[cfg_attr(
        not(windows),
        error("No shared library is found to hook ({hook_set}: tried {})", candidates.join(", "))
    )]
    Resolution {
        hook_set: &'static str,
        candidates: Vec<&'static str>,
    },
    /// A symbol could not be redirected; every earlier symbol was restored.
    #[error("Could not replace function {symbol} in {module}: {cause}")]
    Patch {
        module: String,
        symbol: &'static str,
        cause: SlotFault,
    },
    #[error("binary hooking is not supported on this platform")]
    UnsupportedPlatform,
    #[error("hook set {0} is being installed by another thread")]
    InstallInProgress(&'static str),
}

impl HookError {
    /// Short stable label for log records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolution { .. } => "resolution",
            Self::Patch { .. } => "patch",
            Self::UnsupportedPlatform => "unsupported_platform",
            Self::InstallInProgress(_) => "install_in_progress",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_library_and_symbol() {
        let err = HookError::Patch {
            module: "libclntsh.so.12.1".into(),
            symbol: "read",
            cause: SlotFault::SymbolAbsent,
        };
        assert_eq!(
            err.to_string(),
            "Could not replace function read in libclntsh.so.12.1: symbol is not imported"
        );

        let err = HookError::Resolution {
            hook_set: "primary",
            candidates: vec!["liba.so.2", "liba.so.1"],
        };
        #[cfg(not(windows))]
        assert_eq!(
            err.to_string(),
            "No shared library is found to hook (primary: tried liba.so.2, liba.so.1)"
        );
        assert_eq!(err.kind(), "resolution");
    }

    #[test]
    fn resolution_message_names_the_module_kind() {
        let err = HookError::Resolution {
            hook_set: "primary",
            candidates: vec!["orantcp12.dll", "orantcp11.dll"],
        };
        let message = err.to_string();
        #[cfg(windows)]
        assert_eq!(
            message,
            "No DLL is found to hook (primary: tried orantcp12.dll, orantcp11.dll)"
        );
        #[cfg(not(windows))]
        assert!(message.starts_with("No shared library is found to hook"));
        assert!(message.ends_with("orantcp11.dll)"));
    }

    #[test]
    fn parser_errors_become_malformed() {
        let fault = SlotFault::from(ElfError::MissingDynamicTag("DT_SYMTAB"));
        assert_eq!(
            fault,
            SlotFault::Malformed("missing dynamic tag DT_SYMTAB".into())
        );
        let fault = SlotFault::from(PeError::BadSignature(0));
        assert!(matches!(fault, SlotFault::Malformed(_)));
    }

    #[test]
    fn not_writable_display() {
        let fault = SlotFault::NotWritable {
            address: 0x1000,
            errno: 13,
        };
        assert_eq!(fault.to_string(), "slot at 0x1000 is not writable (os error 13)");
    }
}
