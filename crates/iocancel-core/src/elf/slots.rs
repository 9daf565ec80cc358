//! Locate the dispatch slots bound to an imported symbol.

use super::relocation::{Elf64Rela, RelocArch, parse_relocations};
use super::symbol::{get_string, symbol_at};
use super::ElfResult;

/// Byte views of the tables an object uses to bind its imports.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportView<'a> {
    /// `.rela.plt` (`DT_JMPREL`, `DT_PLTRELSZ` bytes)
    pub plt_relocs: &'a [u8],
    /// `.rela.dyn` (`DT_RELA`, `DT_RELASZ` bytes)
    pub dyn_relocs: &'a [u8],
    /// `.dynsym`, at least `max_symbol_index + 1` entries
    pub symtab: &'a [u8],
    /// `.dynstr` (`DT_STRSZ` bytes)
    pub strtab: &'a [u8],
}

fn binding_relocs(view: &ImportView<'_>, arch: RelocArch) -> ElfResult<Vec<Elf64Rela>> {
    let mut relocs = parse_relocations(view.plt_relocs)?;
    relocs.extend(parse_relocations(view.dyn_relocs)?);
    relocs.retain(|r| r.kind(arch).binds_symbol() && r.symbol_index() != 0);
    Ok(relocs)
}

/// Highest symbol index referenced by a symbol-binding relocation.
///
/// `.dynsym` carries no size in the dynamic section; this tells the caller
/// how much of it must be readable before [`find_import_slots`] runs.
pub fn max_symbol_index(plt_relocs: &[u8], dyn_relocs: &[u8], arch: RelocArch) -> ElfResult<u32> {
    let view = ImportView {
        plt_relocs,
        dyn_relocs,
        ..ImportView::default()
    };
    Ok(binding_relocs(&view, arch)?
        .iter()
        .map(Elf64Rela::symbol_index)
        .max()
        .unwrap_or(0))
}

/// Offsets (relative to the load bias) of every slot bound to `symbol`.
///
/// `JUMP_SLOT` entries come first, then `GLOB_DAT` ones, each in table order.
/// An empty result means the object does not import `symbol`.
pub fn find_import_slots(view: &ImportView<'_>, arch: RelocArch, symbol: &str) -> ElfResult<Vec<u64>> {
    let mut offsets = Vec::new();
    for reloc in binding_relocs(view, arch)? {
        let sym = symbol_at(view.symtab, reloc.symbol_index())?;
        if get_string(view.strtab, sym.st_name)? == symbol && !offsets.contains(&reloc.r_offset) {
            offsets.push(reloc.r_offset);
        }
    }
    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::ElfError;

    fn reloc(offset: u64, symbol_idx: u32, rtype: u32) -> [u8; 24] {
        let mut data = [0u8; 24];
        data[0..8].copy_from_slice(&offset.to_le_bytes());
        let r_info: u64 = ((symbol_idx as u64) << 32) | rtype as u64;
        data[8..16].copy_from_slice(&r_info.to_le_bytes());
        data
    }

    fn symbol(st_name: u32) -> [u8; 24] {
        let mut sym = [0u8; 24];
        sym[0..4].copy_from_slice(&st_name.to_le_bytes());
        sym[4] = 0x12;
        sym
    }

    // index: 0 = null, 1 = read, 2 = write, 3 = socket
    const STRTAB: &[u8] = b"\0read\0write\0socket\0";

    fn symtab() -> Vec<u8> {
        let mut table = vec![0u8; 24];
        table.extend_from_slice(&symbol(1));
        table.extend_from_slice(&symbol(6));
        table.extend_from_slice(&symbol(12));
        table
    }

    fn plt() -> Vec<u8> {
        let mut table = Vec::new();
        table.extend_from_slice(&reloc(0x4018, 2, 7));
        table.extend_from_slice(&reloc(0x4020, 1, 7));
        table.extend_from_slice(&reloc(0x4028, 3, 7));
        table
    }

    fn dyn_relocs() -> Vec<u8> {
        let mut table = Vec::new();
        table.extend_from_slice(&reloc(0x3ff0, 0, 8)); // RELATIVE
        table.extend_from_slice(&reloc(0x3ff8, 1, 6)); // GLOB_DAT read
        table
    }

    #[test]
    fn finds_plt_and_got_slots() {
        let (plt, rela, symtab) = (plt(), dyn_relocs(), symtab());
        let view = ImportView {
            plt_relocs: &plt,
            dyn_relocs: &rela,
            symtab: &symtab,
            strtab: STRTAB,
        };
        let slots = find_import_slots(&view, RelocArch::X86_64, "read").unwrap();
        assert_eq!(slots, vec![0x4020, 0x3ff8]);

        let slots = find_import_slots(&view, RelocArch::X86_64, "socket").unwrap();
        assert_eq!(slots, vec![0x4028]);
    }

    #[test]
    fn absent_symbol_yields_no_slots() {
        let (plt, symtab) = (plt(), symtab());
        let view = ImportView {
            plt_relocs: &plt,
            symtab: &symtab,
            strtab: STRTAB,
            ..ImportView::default()
        };
        let slots = find_import_slots(&view, RelocArch::X86_64, "recv").unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn max_index_ignores_non_binding_relocations() {
        let (plt, rela) = (plt(), dyn_relocs());
        assert_eq!(max_symbol_index(&plt, &rela, RelocArch::X86_64).unwrap(), 3);
        assert_eq!(max_symbol_index(&[], &rela, RelocArch::X86_64).unwrap(), 1);
        assert_eq!(max_symbol_index(&[], &[], RelocArch::X86_64).unwrap(), 0);
    }

    #[test]
    fn truncated_symtab_is_an_error() {
        let plt = plt();
        let short = vec![0u8; 48];
        let view = ImportView {
            plt_relocs: &plt,
            symtab: &short,
            strtab: STRTAB,
            ..ImportView::default()
        };
        assert_eq!(
            find_import_slots(&view, RelocArch::X86_64, "read"),
            Err(ElfError::InvalidSymbolIndex(2))
        );
    }
}
