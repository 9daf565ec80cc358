//! ELF64 views over modules that the dynamic loader already mapped.
//!
//! Nothing here reads files. The platform layer hands over byte slices cut
//! from live memory (program headers, the `PT_DYNAMIC` segment, relocation
//! tables, `.dynsym`, `.dynstr`) and this module turns them into the list of
//! dispatch slots bound to a given imported symbol.
//!
//! # Slot kinds
//!
//! - `JUMP_SLOT` relocations in `DT_JMPREL` (classic PLT/GOT)
//! - `GLOB_DAT` relocations in `DT_RELA` (`-fno-plt` builds, function pointers)
//!
//! Only RELA-style tables on x86_64 and aarch64 are understood. `DT_REL`
//! objects report [`ElfError::UnsupportedRelocation`].

pub mod dynamic;
pub mod program;
pub mod relocation;
pub mod slots;
pub mod symbol;

pub use dynamic::{DynamicTables, DynamicTag};
pub use program::{Elf64ProgramHeader, ProgramFlags, ProgramType, SegmentMap, parse_program_headers};
pub use relocation::{Elf64Rela, RelocArch, RelocationKind, parse_relocations};
pub use slots::{ImportView, find_import_slots, max_symbol_index};
pub use symbol::{Elf64Symbol, get_string, symbol_at};

/// Error type for ELF parsing operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElfError {
    /// Invalid table offset or size
    InvalidOffset { kind: &'static str, offset: u64 },
    /// Buffer too small for requested operation
    BufferTooSmall { needed: usize, available: usize },
    /// Invalid string table index
    InvalidStringIndex(u32),
    /// A required dynamic tag is missing
    MissingDynamicTag(&'static str),
    /// Unsupported relocation table format (`DT_PLTREL` value)
    UnsupportedRelocation(u64),
    /// Invalid symbol index in relocation
    InvalidSymbolIndex(u32),
}

impl core::fmt::Display for ElfError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidOffset { kind, offset } => {
                write!(f, "invalid {kind} offset: {offset:#x}")
            }
            Self::BufferTooSmall { needed, available } => {
                write!(f, "buffer too small: need {needed}, have {available}")
            }
            Self::InvalidStringIndex(idx) => write!(f, "invalid string index: {idx}"),
            Self::MissingDynamicTag(tag) => write!(f, "missing dynamic tag {tag}"),
            Self::UnsupportedRelocation(r) => write!(f, "unsupported relocation table: {r}"),
            Self::InvalidSymbolIndex(idx) => write!(f, "invalid symbol index: {idx}"),
        }
    }
}

impl std::error::Error for ElfError {}

/// Result type for ELF operations.
pub type ElfResult<T> = Result<T, ElfError>;

/// Read a little-endian `u64` at `offset`, bounds-checked.
pub(crate) fn read_u64(data: &[u8], offset: usize) -> ElfResult<u64> {
    let end = offset.checked_add(8).ok_or(ElfError::InvalidOffset {
        kind: "u64 field",
        offset: offset as u64,
    })?;
    let bytes = data.get(offset..end).ok_or(ElfError::BufferTooSmall {
        needed: end,
        available: data.len(),
    })?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(raw))
}
