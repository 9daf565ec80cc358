//! `PT_DYNAMIC` parsing.
//!
//! Only the tags that locate the import tables are kept. Pointer-valued
//! entries are relocated in place by glibc on most architectures but left
//! base-relative on others (RISC-V, MIPS, most non-glibc loaders), so
//! [`DynamicTables::rebase`] normalizes both forms to absolute addresses.

use super::{ElfError, ElfResult};

/// Dynamic section tags used for import lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicTag {
    Null,
    PltRelSz,
    StrTab,
    SymTab,
    Rela,
    RelaSz,
    StrSz,
    PltRel,
    JmpRel,
    Other(i64),
}

impl From<i64> for DynamicTag {
    fn from(value: i64) -> Self {
        match value {
            0 => Self::Null,
            2 => Self::PltRelSz,
            5 => Self::StrTab,
            6 => Self::SymTab,
            7 => Self::Rela,
            8 => Self::RelaSz,
            10 => Self::StrSz,
            20 => Self::PltRel,
            23 => Self::JmpRel,
            other => Self::Other(other),
        }
    }
}

/// `DT_RELA`, as stored in `DT_PLTREL`.
const PLTREL_RELA: u64 = 7;

/// Size of one `Elf64_Dyn` entry.
pub const DYN_ENTRY_SIZE: usize = 16;

/// Import-related tables of one mapped object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DynamicTables {
    /// `.dynsym`
    pub symtab: u64,
    /// `.dynstr`
    pub strtab: u64,
    /// Size of `.dynstr` in bytes
    pub strsz: u64,
    /// `.rela.plt`
    pub jmprel: u64,
    /// Size of `.rela.plt` in bytes
    pub pltrelsz: u64,
    /// `.rela.dyn`
    pub rela: u64,
    /// Size of `.rela.dyn` in bytes
    pub relasz: u64,
}

impl DynamicTables {
    /// Parse `Elf64_Dyn` entries up to `DT_NULL` or the end of `data`.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        let mut tables = Self::default();
        let mut pltrel = PLTREL_RELA;

        for entry in data.chunks_exact(DYN_ENTRY_SIZE) {
            let tag = DynamicTag::from(super::read_u64(entry, 0)? as i64);
            let value = super::read_u64(entry, 8)?;
            match tag {
                DynamicTag::Null => break,
                DynamicTag::PltRelSz => tables.pltrelsz = value,
                DynamicTag::StrTab => tables.strtab = value,
                DynamicTag::SymTab => tables.symtab = value,
                DynamicTag::Rela => tables.rela = value,
                DynamicTag::RelaSz => tables.relasz = value,
                DynamicTag::StrSz => tables.strsz = value,
                DynamicTag::PltRel => pltrel = value,
                DynamicTag::JmpRel => tables.jmprel = value,
                DynamicTag::Other(_) => {}
            }
        }

        if pltrel != PLTREL_RELA && tables.jmprel != 0 {
            return Err(ElfError::UnsupportedRelocation(pltrel));
        }
        if tables.symtab == 0 {
            return Err(ElfError::MissingDynamicTag("DT_SYMTAB"));
        }
        if tables.strtab == 0 {
            return Err(ElfError::MissingDynamicTag("DT_STRTAB"));
        }
        Ok(tables)
    }

    /// Turn base-relative table pointers into absolute ones.
    #[must_use]
    pub fn rebase(self, base: u64) -> Self {
        let fix = |ptr: u64| {
            if ptr != 0 && ptr < base {
                ptr.wrapping_add(base)
            } else {
                ptr
            }
        };
        Self {
            symtab: fix(self.symtab),
            strtab: fix(self.strtab),
            jmprel: fix(self.jmprel),
            rela: fix(self.rela),
            ..self
        }
    }

    /// Whether the object has any relocation table that can bind imports.
    pub fn has_import_relocations(&self) -> bool {
        (self.jmprel != 0 && self.pltrelsz != 0) || (self.rela != 0 && self.relasz != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(buf: &mut Vec<u8>, tag: i64, value: u64) {
        buf.extend_from_slice(&tag.to_le_bytes());
        buf.extend_from_slice(&value.to_le_bytes());
    }

    fn sample() -> Vec<u8> {
        let mut buf = Vec::new();
        push(&mut buf, 1, 0x55); // DT_NEEDED
        push(&mut buf, 6, 0x300);
        push(&mut buf, 5, 0x600);
        push(&mut buf, 10, 0x80);
        push(&mut buf, 23, 0x900);
        push(&mut buf, 2, 48);
        push(&mut buf, 20, 7);
        push(&mut buf, 7, 0x800);
        push(&mut buf, 8, 24);
        push(&mut buf, 0, 0);
        push(&mut buf, 6, 0xdead); // after DT_NULL, ignored
        buf
    }

    #[test]
    fn parses_import_tables() {
        let tables = DynamicTables::parse(&sample()).unwrap();
        assert_eq!(tables.symtab, 0x300);
        assert_eq!(tables.strtab, 0x600);
        assert_eq!(tables.strsz, 0x80);
        assert_eq!(tables.jmprel, 0x900);
        assert_eq!(tables.pltrelsz, 48);
        assert_eq!(tables.rela, 0x800);
        assert_eq!(tables.relasz, 24);
        assert!(tables.has_import_relocations());
    }

    #[test]
    fn rebase_only_touches_relative_pointers() {
        let tables = DynamicTables::parse(&sample()).unwrap();
        let rebased = tables.rebase(0x7f00_0000_0000);
        assert_eq!(rebased.symtab, 0x7f00_0000_0300);
        assert_eq!(rebased.strsz, 0x80);

        let again = rebased.rebase(0x7f00_0000_0000);
        assert_eq!(again, rebased);
    }

    #[test]
    fn rel_style_plt_is_rejected() {
        let mut buf = Vec::new();
        push(&mut buf, 6, 0x300);
        push(&mut buf, 5, 0x600);
        push(&mut buf, 23, 0x900);
        push(&mut buf, 20, 17); // DT_REL
        push(&mut buf, 0, 0);
        assert_eq!(
            DynamicTables::parse(&buf),
            Err(ElfError::UnsupportedRelocation(17))
        );
    }

    #[test]
    fn missing_symtab_is_reported() {
        let mut buf = Vec::new();
        push(&mut buf, 5, 0x600);
        push(&mut buf, 0, 0);
        assert_eq!(
            DynamicTables::parse(&buf),
            Err(ElfError::MissingDynamicTag("DT_SYMTAB"))
        );
    }
}
