//! ELF64 RELA entries and the two relocation kinds that bind import slots.
//!
//! Relocation numbering is per machine, so classification goes through
//! [`RelocArch`]:
//!
//! | kind        | x86_64 | aarch64 |
//! |-------------|--------|---------|
//! | `GLOB_DAT`  | 6      | 1025    |
//! | `JUMP_SLOT` | 7      | 1026    |

use super::{ElfError, ElfResult};

/// Machine whose relocation numbering applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocArch {
    X86_64,
    Aarch64,
}

impl RelocArch {
    /// Architecture of the running process, if its relocations are understood.
    pub const fn host() -> Option<Self> {
        if cfg!(target_arch = "x86_64") {
            Some(Self::X86_64)
        } else if cfg!(target_arch = "aarch64") {
            Some(Self::Aarch64)
        } else {
            None
        }
    }

    const fn glob_dat(self) -> u32 {
        match self {
            Self::X86_64 => 6,
            Self::Aarch64 => 1025,
        }
    }

    const fn jump_slot(self) -> u32 {
        match self {
            Self::X86_64 => 7,
            Self::Aarch64 => 1026,
        }
    }

    /// Classify a raw relocation type number.
    pub fn classify(self, raw: u32) -> RelocationKind {
        if raw == self.jump_slot() {
            RelocationKind::JumpSlot
        } else if raw == self.glob_dat() {
            RelocationKind::GlobDat
        } else {
            RelocationKind::Other(raw)
        }
    }
}

/// What a relocation does, from the point of view of import hooking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationKind {
    /// PLT entry: the slot holds the call target of an imported function
    JumpSlot,
    /// GOT entry: the slot holds the address of an imported symbol
    GlobDat,
    /// Anything else; never rewritten
    Other(u32),
}

impl RelocationKind {
    /// Whether the slot written by this relocation holds a symbol address.
    pub fn binds_symbol(self) -> bool {
        matches!(self, Self::JumpSlot | Self::GlobDat)
    }
}

/// ELF64 RELA relocation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64Rela {
    /// Address where relocation applies, relative to the load bias
    pub r_offset: u64,
    /// Relocation type and symbol index
    pub r_info: u64,
    /// Constant addend
    pub r_addend: i64,
}

impl Elf64Rela {
    /// Size of an ELF64 RELA entry in bytes.
    pub const SIZE: usize = 24;

    /// Parse a RELA entry from a byte slice.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ElfError::BufferTooSmall {
                needed: Self::SIZE,
                available: data.len(),
            });
        }

        Ok(Self {
            r_offset: super::read_u64(data, 0)?,
            r_info: super::read_u64(data, 8)?,
            r_addend: super::read_u64(data, 16)? as i64,
        })
    }

    /// Raw relocation type.
    pub fn raw_type(&self) -> u32 {
        (self.r_info & 0xffff_ffff) as u32
    }

    /// Relocation kind under `arch` numbering.
    pub fn kind(&self, arch: RelocArch) -> RelocationKind {
        arch.classify(self.raw_type())
    }

    /// Get the symbol index.
    pub fn symbol_index(&self) -> u32 {
        (self.r_info >> 32) as u32
    }
}

/// Parse every RELA entry in `data`. Trailing bytes shorter than one entry
/// are ignored.
pub fn parse_relocations(data: &[u8]) -> ElfResult<Vec<Elf64Rela>> {
    data.chunks_exact(Elf64Rela::SIZE)
        .map(Elf64Rela::parse)
        .collect()
}
