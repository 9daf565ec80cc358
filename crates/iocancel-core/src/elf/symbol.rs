//! ELF64 dynamic symbol table access.
//!
//! A relocation names its symbol by index into `.dynsym`; the name itself
//! lives in `.dynstr`.

use super::{ElfError, ElfResult};

/// ELF64 symbol table entry.
#[derive(Debug, Clone, Copy)]
pub struct Elf64Symbol {
    /// Symbol name (index into string table)
    pub st_name: u32,
    /// Symbol info (type and binding)
    pub st_info: u8,
    /// Section index
    pub st_shndx: u16,
    /// Symbol value (address)
    pub st_value: u64,
}

impl Elf64Symbol {
    /// Size of an ELF64 symbol entry in bytes.
    pub const SIZE: usize = 24;

    /// Parse a symbol from a byte slice.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ElfError::BufferTooSmall {
                needed: Self::SIZE,
                available: data.len(),
            });
        }

        Ok(Self {
            st_name: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            st_info: data[4],
            st_shndx: u16::from_le_bytes([data[6], data[7]]),
            st_value: super::read_u64(data, 8)?,
        })
    }
}

/// Read symbol `index` out of a `.dynsym` slice.
pub fn symbol_at(symtab: &[u8], index: u32) -> ElfResult<Elf64Symbol> {
    let start = (index as usize)
        .checked_mul(Elf64Symbol::SIZE)
        .ok_or(ElfError::InvalidSymbolIndex(index))?;
    let entry = symtab
        .get(start..)
        .filter(|rest| rest.len() >= Elf64Symbol::SIZE)
        .ok_or(ElfError::InvalidSymbolIndex(index))?;
    Elf64Symbol::parse(entry)
}

/// Get a string from a string table.
pub fn get_string(strtab: &[u8], index: u32) -> ElfResult<&str> {
    let start = index as usize;
    let tail = strtab
        .get(start..)
        .filter(|tail| !tail.is_empty())
        .ok_or(ElfError::InvalidStringIndex(index))?;

    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(ElfError::InvalidStringIndex(index))?;

    core::str::from_utf8(&tail[..end]).map_err(|_| ElfError::InvalidStringIndex(index))
}
